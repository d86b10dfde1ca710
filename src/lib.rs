//! peforge: parse, edit, and rebuild PE images.
//!
//! The crate decodes a Windows Portable Executable into an owned object
//! model ([`Binary`]), offers structural editors over it (sections,
//! imports, base relocations, data directories), and serializes the result
//! back to bytes ([`Builder`]). Rebuilding an unedited binary reproduces
//! the input byte for byte, overlay and Authenticode blob included.
//!
//! ```no_run
//! use peforge::{Binary, Section, SectionFlags};
//!
//! # fn main() -> Result<(), peforge::Error> {
//! let mut binary = Binary::from_path("app.exe")?;
//! binary.add_library("USER32.DLL")?;
//! let slot = binary.add_import_function("USER32.DLL", "MessageBoxA")?;
//! println!("IAT slot at rva {slot:#x}");
//!
//! binary.add_section(Section::new(
//!     ".payload",
//!     vec![0u8; 64],
//!     SectionFlags::CNT_INITIALIZED_DATA | SectionFlags::MEM_READ,
//! ))?;
//! binary.write("app.patched.exe")?;
//! # Ok(())
//! # }
//! ```
//!
//! Header corruption fails [`Binary::parse`]; a single malformed data
//! directory only degrades its own entity and keeps the raw directory
//! values, so the rest of the file stays usable.

pub mod binary;
pub mod builder;
pub mod checksum;
pub mod coff;
pub mod data_dir;
pub mod debug;
pub mod dos;
pub mod error;
pub mod export;
pub mod import;
pub mod layout;
pub mod optional;
pub mod parser;
pub mod reloc;
pub mod resource;
pub mod section;
pub mod signature;
pub mod symbol;
pub mod tls;
pub mod translate;
pub mod view;

pub use binary::{Binary, Object, SectionHandle};
pub use builder::Builder;
pub use coff::{CoffHeader, FileCharacteristics, Machine};
pub use data_dir::{DataDirectory, DirectoryType};
pub use debug::{DebugEntry, DebugType};
pub use dos::DosHeader;
pub use error::{AddressError, BuildError, EditError, Error, ParseError, Result};
pub use export::{Export, ExportEntry, ExportTarget};
pub use import::{Import, ImportEntry, ImportName};
pub use optional::{DllCharacteristics, OptionalHeader, PeKind, Subsystem};
pub use reloc::{RelocationBlock, RelocationEntry, RelocationKind};
pub use resource::{ResourceId, ResourceNode};
pub use section::{Section, SectionFlags};
pub use signature::Certificate;
pub use symbol::Symbol;
pub use tls::Tls;
