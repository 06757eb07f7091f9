/*
 *  extension/machine.rs
 *
 *  RVExt - extension test bench
 *  (c) 2020-26 Stuart Hunter
 *
 *  Binary compatibility checks - reads the target machine from image headers
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

//! Binary compatibility checker
//!
//! Works out which architecture a library was built for by reading its
//! header from disk, without handing it to the dynamic loader.
//!
//! PE layout used here (see the Microsoft PE/COFF specification):
//!
//! - offset `0x3C`: `i32` LE offset of the PE signature
//! - signature: `50 45 00 00` ("PE\0\0")
//! - followed by the `u16` LE COFF machine field

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use log::debug;

use super::error::{ExtensionError, Result};

/// Offset of `e_lfanew` in the DOS stub
const PE_POINTER_OFFSET: u64 = 0x3C;

/// "PE\0\0" as a little-endian u32
const PE_SIGNATURE: u32 = 0x0000_4550;

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// COFF machine type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineType {
    Unknown,
    Am33,
    Amd64,
    Arm,
    Arm64,
    Ebc,
    I386,
    Ia64,
    M32R,
    Mips16,
    MipsFpu,
    MipsFpu16,
    PowerPc,
    PowerPcFp,
    R4000,
    Sh3,
    Sh3Dsp,
    Sh4,
    Sh5,
    Thumb,
    WceMipsV2,
    /// Code with no named variant, carried through untouched
    Other(u16),
}

impl MachineType {
    pub fn from_code(code: u16) -> Self {
        match code {
            0x0000 => MachineType::Unknown,
            0x01d3 => MachineType::Am33,
            0x8664 => MachineType::Amd64,
            0x01c0 => MachineType::Arm,
            0xaa64 => MachineType::Arm64,
            0x0ebc => MachineType::Ebc,
            0x014c => MachineType::I386,
            0x0200 => MachineType::Ia64,
            0x9041 => MachineType::M32R,
            0x0266 => MachineType::Mips16,
            0x0366 => MachineType::MipsFpu,
            0x0466 => MachineType::MipsFpu16,
            0x01f0 => MachineType::PowerPc,
            0x01f1 => MachineType::PowerPcFp,
            0x0166 => MachineType::R4000,
            0x01a2 => MachineType::Sh3,
            0x01a3 => MachineType::Sh3Dsp,
            0x01a6 => MachineType::Sh4,
            0x01a8 => MachineType::Sh5,
            0x01c2 => MachineType::Thumb,
            0x0169 => MachineType::WceMipsV2,
            other => MachineType::Other(other),
        }
    }

    pub fn code(self) -> u16 {
        match self {
            MachineType::Unknown => 0x0000,
            MachineType::Am33 => 0x01d3,
            MachineType::Amd64 => 0x8664,
            MachineType::Arm => 0x01c0,
            MachineType::Arm64 => 0xaa64,
            MachineType::Ebc => 0x0ebc,
            MachineType::I386 => 0x014c,
            MachineType::Ia64 => 0x0200,
            MachineType::M32R => 0x9041,
            MachineType::Mips16 => 0x0266,
            MachineType::MipsFpu => 0x0366,
            MachineType::MipsFpu16 => 0x0466,
            MachineType::PowerPc => 0x01f0,
            MachineType::PowerPcFp => 0x01f1,
            MachineType::R4000 => 0x0166,
            MachineType::Sh3 => 0x01a2,
            MachineType::Sh3Dsp => 0x01a3,
            MachineType::Sh4 => 0x01a6,
            MachineType::Sh5 => 0x01a8,
            MachineType::Thumb => 0x01c2,
            MachineType::WceMipsV2 => 0x0169,
            MachineType::Other(code) => code,
        }
    }

    /// Pointer width the architecture implies, if it implies one
    ///
    /// EFI byte code is width-agnostic, and unrecognized codes tell us nothing.
    pub fn pointer_width(self) -> Option<u32> {
        match self {
            MachineType::Amd64 | MachineType::Arm64 | MachineType::Ia64 => Some(64),
            MachineType::Unknown | MachineType::Ebc | MachineType::Other(_) => None,
            _ => Some(32),
        }
    }
}

impl From<u16> for MachineType {
    fn from(code: u16) -> Self {
        MachineType::from_code(code)
    }
}

impl fmt::Display for MachineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MachineType::Unknown => "unknown",
            MachineType::Am33 => "am33",
            MachineType::Amd64 => "x64",
            MachineType::Arm => "arm",
            MachineType::Arm64 => "arm64",
            MachineType::Ebc => "ebc",
            MachineType::I386 => "x86",
            MachineType::Ia64 => "ia64",
            MachineType::M32R => "m32r",
            MachineType::Mips16 => "mips16",
            MachineType::MipsFpu => "mipsfpu",
            MachineType::MipsFpu16 => "mipsfpu16",
            MachineType::PowerPc => "powerpc",
            MachineType::PowerPcFp => "powerpcfp",
            MachineType::R4000 => "r4000",
            MachineType::Sh3 => "sh3",
            MachineType::Sh3Dsp => "sh3dsp",
            MachineType::Sh4 => "sh4",
            MachineType::Sh5 => "sh5",
            MachineType::Thumb => "thumb",
            MachineType::WceMipsV2 => "wcemipsv2",
            MachineType::Other(code) => return write!(f, "0x{:04x}", code),
        };
        f.write_str(name)
    }
}

/// On-disk image container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Pe,
    Elf,
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageFormat::Pe => f.write_str("PE"),
            ImageFormat::Elf => f.write_str("ELF"),
        }
    }
}

/// What a header probe found out about a library
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub format: ImageFormat,
    pub machine: MachineType,
    /// 32 or 64 when the header pins it down
    pub pointer_width: Option<u32>,
}

/// Read the COFF machine type from a PE image
pub fn read_machine_type<P: AsRef<Path>>(path: P) -> Result<MachineType> {
    let path = path.as_ref();
    let mut file = File::open(path).map_err(|e| header_error(path, e))?;
    let machine = pe_machine(&mut file).map_err(|e| header_error(path, e))?;
    debug!("{}: PE machine {} (0x{:04x})", path.display(), machine, machine.code());
    Ok(machine)
}

/// Identify the image format and read its target machine
///
/// ELF images contribute their class byte as the pointer width. Anything
/// else goes through the same path as [`read_machine_type`], so the DOS
/// `MZ` stub is not required; only the `0x3C` pointer and PE signature are.
pub fn probe<P: AsRef<Path>>(path: P) -> Result<ImageInfo> {
    let path = path.as_ref();
    let mut file = File::open(path).map_err(|e| header_error(path, e))?;

    let mut magic = [0u8; 4];
    let is_elf = match file.read_exact(&mut magic) {
        Ok(()) => magic == ELF_MAGIC,
        // too short for either; let the PE path report it
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => false,
        Err(e) => return Err(header_error(path, e)),
    };

    let info = if is_elf {
        elf_info(&mut file).map_err(|e| header_error(path, e))?
    } else {
        let machine = pe_machine(&mut file).map_err(|e| header_error(path, e))?;
        ImageInfo {
            format: ImageFormat::Pe,
            machine,
            pointer_width: machine.pointer_width(),
        }
    };

    debug!(
        "{}: {} image, machine {}, {}-bit",
        path.display(),
        info.format,
        info.machine,
        info.pointer_width.map_or_else(|| "?".to_string(), |w| w.to_string())
    );
    Ok(info)
}

/// Header read failure, before it gets a path attached
enum HeaderError {
    Format(&'static str),
    Io(io::Error),
}

impl From<io::Error> for HeaderError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            HeaderError::Format("truncated image header")
        } else {
            HeaderError::Io(err)
        }
    }
}

fn header_error(path: &Path, err: impl Into<HeaderError>) -> ExtensionError {
    match err.into() {
        HeaderError::Format(msg) => ExtensionError::Format(format!("{}: {}", msg, path.display())),
        HeaderError::Io(source) => ExtensionError::Header { path: path.to_path_buf(), source },
    }
}

fn pe_machine<R: Read + Seek>(reader: &mut R) -> std::result::Result<MachineType, HeaderError> {
    reader.seek(SeekFrom::Start(PE_POINTER_OFFSET))?;
    let pe_offset = i32::from_le_bytes(read_array(reader)?);
    if pe_offset < 0 {
        return Err(HeaderError::Format("can't find header"));
    }

    reader.seek(SeekFrom::Start(pe_offset as u64))?;
    let signature = u32::from_le_bytes(read_array(reader)?);
    if signature != PE_SIGNATURE {
        return Err(HeaderError::Format("can't find header"));
    }

    let code = u16::from_le_bytes(read_array(reader)?);
    Ok(MachineType::from_code(code))
}

// ELF identification bytes and the e_machine values we name
const EI_CLASS: u64 = 4;
const E_MACHINE: u64 = 18;
const ELFCLASS32: u8 = 1;
const ELFCLASS64: u8 = 2;
const ELFDATA2MSB: u8 = 2;

fn elf_info<R: Read + Seek>(reader: &mut R) -> std::result::Result<ImageInfo, HeaderError> {
    reader.seek(SeekFrom::Start(EI_CLASS))?;
    let [class, data] = read_array(reader)?;

    let pointer_width = match class {
        ELFCLASS32 => 32,
        ELFCLASS64 => 64,
        _ => return Err(HeaderError::Format("invalid ELF class")),
    };

    reader.seek(SeekFrom::Start(E_MACHINE))?;
    let raw = read_array(reader)?;
    let e_machine = if data == ELFDATA2MSB {
        u16::from_be_bytes(raw)
    } else {
        u16::from_le_bytes(raw)
    };

    let machine = match e_machine {
        3 => MachineType::I386,
        20 => MachineType::PowerPc,
        40 => MachineType::Arm,
        50 => MachineType::Ia64,
        62 => MachineType::Amd64,
        183 => MachineType::Arm64,
        // ELF numbering, not COFF; only meaningful alongside the class byte
        other => MachineType::Other(other),
    };

    Ok(ImageInfo {
        format: ImageFormat::Elf,
        machine,
        pointer_width: Some(pointer_width),
    })
}

fn read_array<const N: usize, R: Read>(reader: &mut R) -> io::Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}
