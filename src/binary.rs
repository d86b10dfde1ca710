//! The parsed image and its structural editors.
//!
//! Editors keep the header model consistent as they mutate: section counts,
//! `sizeof_image`, `sizeof_headers` and the data directories are maintained
//! at edit time, so the builder serializes what it is given instead of
//! re-deriving layout. Every structural mutation bumps a generation counter
//! that invalidates previously issued [`SectionHandle`]s.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;
use tracing::debug;

use crate::builder::Builder;
use crate::coff::{CoffHeader, FileCharacteristics, Machine};
use crate::data_dir::{DataDirectory, DirectoryTable, DirectoryType};
use crate::debug::DebugEntry;
use crate::dos::{self, DosHeader};
use crate::error::{AddressError, EditError, Error, ParseError};
use crate::export::Export;
use crate::import::{self, Import, ImportEntry, ImportName};
use crate::layout::{align_up, raw_headers_size};
use crate::optional::{OptionalHeader, PeKind};
use crate::parser;
use crate::reloc::{RelocationBlock, RelocationEntry};
use crate::resource::ResourceNode;
use crate::section::{Section, SectionFlags};
use crate::signature::Certificate;
use crate::symbol::Symbol;
use crate::tls::Tls;
use crate::translate;

/// Section the rebuilt import table is staged into.
const IMPORT_STAGING: &str = ".idata2";
/// Section header slots a from-scratch image reserves space for.
const HEADER_TABLE_SLOTS: usize = 16;
/// Section a relocation table that outgrew its home is staged into.
const RELOC_STAGING: &str = ".reloc2";

/// Stable reference to a section, valid until the next structural edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHandle {
    index: usize,
    generation: u64,
}

/// Capabilities shared by loadable objects, for tooling that does not care
/// which executable format it is looking at.
pub trait Object {
    /// Preferred VA of the entrypoint.
    fn entrypoint(&self) -> u64;
    fn imagebase(&self) -> u64;
    /// Size of the loaded image in memory.
    fn virtual_size(&self) -> u64;
    fn is_64(&self) -> bool;
    fn imported_libraries(&self) -> Vec<&str>;
    fn exported_names(&self) -> Vec<&str>;
}

/// A decoded PE image: headers, sections, and the entities behind the data
/// directories, all owned.
#[derive(Debug, Clone)]
pub struct Binary {
    pub(crate) dos: DosHeader,
    pub(crate) dos_stub: Vec<u8>,
    pub(crate) coff: CoffHeader,
    pub(crate) optional: OptionalHeader,
    pub(crate) directories: DirectoryTable,
    /// Directory values as they stood at parse or creation time. Entries
    /// still matching their baseline are written back verbatim without
    /// translation checks, so degraded parses rebuild byte for byte.
    pub(crate) baseline_directories: DirectoryTable,
    pub(crate) sections: Vec<Section>,
    pub(crate) imports: Vec<Import>,
    pub(crate) export: Option<Export>,
    pub(crate) relocations: Vec<RelocationBlock>,
    pub(crate) tls: Option<Tls>,
    pub(crate) debug_entries: Vec<DebugEntry>,
    pub(crate) resources: Option<ResourceNode>,
    pub(crate) certificates: Vec<Certificate>,
    pub(crate) symbols: Vec<Symbol>,
    pub(crate) overlay: Vec<u8>,
    pub(crate) generation: u64,
}

impl Binary {
    /// Parse an image from raw bytes.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        parser::parse(data)
    }

    /// Memory-map and parse an image from disk.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = File::open(path)?;
        // Safety: the map is read-only and dropped before this returns;
        // every byte is copied into the owned model.
        let map = unsafe { Mmap::map(&file)? };
        Ok(parser::parse(&map)?)
    }

    /// A minimal empty image of the given kind: headers only, no sections.
    pub fn new(kind: PeKind) -> Self {
        let mut coff = CoffHeader {
            machine: match kind {
                PeKind::Pe32 => Machine::I386 as u16,
                PeKind::Pe64 => Machine::Amd64 as u16,
            },
            numberof_sections: 0,
            timestamp: 0,
            pointerto_symbol_table: 0,
            numberof_symbols: 0,
            sizeof_optional_header: 0,
            characteristics: FileCharacteristics::EXECUTABLE_IMAGE,
        };
        if kind == PeKind::Pe64 {
            coff.characteristics |= FileCharacteristics::LARGE_ADDRESS_AWARE;
        }

        let mut optional = OptionalHeader::with_defaults(kind);
        let directories = DirectoryTable::default();
        coff.sizeof_optional_header = (kind.base_size() + directories.byte_size()) as u16;

        let dos = DosHeader::default();
        let dos_stub = dos::default_stub();
        // Reserve header slack up front: the first section's raw data lands
        // right after the headers and cannot be moved later.
        optional.sizeof_headers = align_up(
            raw_headers_size(
                dos_stub.len(),
                coff.sizeof_optional_header as usize,
                HEADER_TABLE_SLOTS,
            ),
            optional.file_alignment,
        );
        optional.sizeof_image = align_up(optional.sizeof_headers, optional.section_alignment);

        Self {
            dos,
            dos_stub,
            coff,
            optional,
            baseline_directories: directories.clone(),
            directories,
            sections: Vec::new(),
            imports: Vec::new(),
            export: None,
            relocations: Vec::new(),
            tls: None,
            debug_entries: Vec::new(),
            resources: None,
            certificates: Vec::new(),
            symbols: Vec::new(),
            overlay: Vec::new(),
            generation: 0,
        }
    }

    // Header access.

    pub fn dos_header(&self) -> &DosHeader {
        &self.dos
    }

    pub fn dos_stub(&self) -> &[u8] {
        &self.dos_stub
    }

    pub fn coff_header(&self) -> &CoffHeader {
        &self.coff
    }

    pub fn optional_header(&self) -> &OptionalHeader {
        &self.optional
    }

    /// Mutable optional header. Scalar fields (entrypoint, subsystem,
    /// versions) can be edited freely; the sizes are maintained by the
    /// structural editors and will be overwritten by them.
    pub fn optional_header_mut(&mut self) -> &mut OptionalHeader {
        &mut self.optional
    }

    pub fn kind(&self) -> PeKind {
        self.optional.kind
    }

    pub fn is_dll(&self) -> bool {
        self.coff.is_dll()
    }

    /// Raw (rva, size) of a directory slot, even when its entity failed to
    /// decode.
    pub fn data_directory(&self, kind: DirectoryType) -> DataDirectory {
        self.directories.get(kind)
    }

    /// Unguarded directory access; see [`DirectoryTable::get_mut`].
    pub fn data_directory_mut(&mut self, kind: DirectoryType) -> &mut DataDirectory {
        self.directories.get_mut(kind)
    }

    // Entities.

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name() == name)
    }

    pub fn imports(&self) -> &[Import] {
        &self.imports
    }

    pub fn has_imports(&self) -> bool {
        !self.imports.is_empty()
    }

    pub fn import(&self, library: &str) -> Option<&Import> {
        self.imports
            .iter()
            .find(|i| i.name.eq_ignore_ascii_case(library))
    }

    pub fn export(&self) -> Option<&Export> {
        self.export.as_ref()
    }

    pub fn has_exports(&self) -> bool {
        self.export.is_some()
    }

    pub fn relocations(&self) -> &[RelocationBlock] {
        &self.relocations
    }

    pub fn has_relocations(&self) -> bool {
        !self.relocations.is_empty()
            || self
                .directories
                .get(DirectoryType::BaseRelocationTable)
                .is_present()
    }

    pub fn tls(&self) -> Option<&Tls> {
        self.tls.as_ref()
    }

    pub fn has_tls(&self) -> bool {
        self.tls.is_some()
    }

    pub fn debug_entries(&self) -> &[DebugEntry] {
        &self.debug_entries
    }

    pub fn has_debug(&self) -> bool {
        !self.debug_entries.is_empty()
    }

    pub fn resources(&self) -> Option<&ResourceNode> {
        self.resources.as_ref()
    }

    pub fn has_resources(&self) -> bool {
        self.resources.is_some()
    }

    pub fn certificates(&self) -> &[Certificate] {
        &self.certificates
    }

    pub fn is_signed(&self) -> bool {
        self.directories
            .get(DirectoryType::CertificateTable)
            .is_present()
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Bytes past the end of the image proper, preserved verbatim.
    pub fn overlay(&self) -> &[u8] {
        &self.overlay
    }

    // Address translation.

    pub fn rva_to_offset(&self, rva: u32) -> Result<u32, AddressError> {
        translate::rva_to_offset(&self.sections, rva)
    }

    pub fn va_to_offset(&self, va: u64) -> Result<u32, AddressError> {
        translate::va_to_offset(&self.sections, self.optional.imagebase, va)
    }

    pub fn section_from_rva(&self, rva: u32) -> Option<&Section> {
        translate::section_from_rva(&self.sections, rva)
    }

    pub fn section_from_offset(&self, offset: u32) -> Option<&Section> {
        translate::section_from_offset(&self.sections, offset)
    }

    // Handles.

    /// Handle to the first section with the given name, pinned to the
    /// current structural generation.
    pub fn section_handle(&self, name: &str) -> Option<SectionHandle> {
        self.sections
            .iter()
            .position(|s| s.name() == name)
            .map(|index| SectionHandle {
                index,
                generation: self.generation,
            })
    }

    pub fn section_by_handle(&self, handle: SectionHandle) -> Result<&Section, EditError> {
        if handle.generation != self.generation {
            return Err(EditError::StaleHandle);
        }
        Ok(&self.sections[handle.index])
    }

    /// Mutable section access through a live handle. Content edits are fine;
    /// address and size fields are maintained by the editors.
    pub fn section_by_handle_mut(
        &mut self,
        handle: SectionHandle,
    ) -> Result<&mut Section, EditError> {
        if handle.generation != self.generation {
            return Err(EditError::StaleHandle);
        }
        Ok(&mut self.sections[handle.index])
    }

    // Section editors.

    /// Append a section, assigning its virtual address and raw placement
    /// after the current last section.
    pub fn add_section(&mut self, section: Section) -> Result<SectionHandle, EditError> {
        let index = self.insert_section(section)?;
        self.bump();
        Ok(SectionHandle {
            index,
            generation: self.generation,
        })
    }

    /// Remove the first section with the given name. Directories pointing
    /// into it are not rewritten; callers removing load-bearing sections
    /// are expected to fix the directories through the escape hatch.
    pub fn remove_section(&mut self, name: &str) -> Result<(), EditError> {
        let index = self
            .sections
            .iter()
            .position(|s| s.name() == name)
            .ok_or_else(|| EditError::SectionNotFound(name.to_string()))?;
        self.sections.remove(index);
        self.coff.numberof_sections = self.sections.len() as u16;
        self.recompute_sizeof_image();
        self.bump();
        Ok(())
    }

    // Import editors. Any import edit rebuilds the whole table into the
    // staging section, so every entry's IAT slot RVA is final as soon as
    // the edit returns.

    /// Add an imported library (no-op if it is already present).
    pub fn add_library(&mut self, name: &str) -> Result<(), EditError> {
        if self.import(name).is_some() {
            return Ok(());
        }
        self.imports.push(Import::new(name));
        self.rebuild_imports()
    }

    /// Add a by-name import and return the RVA of its IAT slot. The library
    /// descriptor is created first when absent, like [`Self::add_library`].
    pub fn add_import_function(&mut self, library: &str, function: &str) -> Result<u32, EditError> {
        let index = match self
            .imports
            .iter()
            .position(|i| i.name.eq_ignore_ascii_case(library))
        {
            Some(index) => index,
            None => {
                self.imports.push(Import::new(library));
                self.imports.len() - 1
            }
        };

        if let Some(entry) = self.imports[index].entry(function) {
            return Ok(entry.iat_rva);
        }

        self.imports[index].entries.push(ImportEntry {
            symbol: ImportName::ByName {
                hint: 0,
                name: function.to_string(),
            },
            iat_rva: 0,
        });
        self.rebuild_imports()?;
        Ok(self.imports[index]
            .entries
            .last()
            .map(|e| e.iat_rva)
            .unwrap_or(0))
    }

    /// IAT slot RVA `add_import_function` would assign, without mutating.
    /// For an already-imported function this is its current slot.
    pub fn predict_function_rva(&self, library: &str, function: &str) -> Result<u32, EditError> {
        let mut simulated = self.imports.clone();
        let index = match simulated
            .iter()
            .position(|i| i.name.eq_ignore_ascii_case(library))
        {
            Some(index) => index,
            None => {
                simulated.push(Import::new(library));
                simulated.len() - 1
            }
        };

        if let Some(entry) = simulated[index].entry(function) {
            return Ok(entry.iat_rva);
        }

        simulated[index].entries.push(ImportEntry {
            symbol: ImportName::ByName {
                hint: 0,
                name: function.to_string(),
            },
            iat_rva: 0,
        });
        let base = self.import_table_base();
        let laid = import::layout(&simulated, self.optional.kind, base);
        Ok(laid.slots[index]
            .last()
            .copied()
            .unwrap_or(0))
    }

    /// Drop one imported library and rebuild the table.
    pub fn remove_library(&mut self, name: &str) -> Result<(), EditError> {
        let index = self
            .imports
            .iter()
            .position(|i| i.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| EditError::LibraryNotFound(name.to_string()))?;
        self.imports.remove(index);
        self.rebuild_imports()
    }

    /// Drop the whole import table.
    pub fn remove_all_libraries(&mut self) -> Result<(), EditError> {
        self.imports.clear();
        self.rebuild_imports()
    }

    // Relocation editors.

    /// Merge fixups into the block for their page (created if absent) and
    /// rewrite the relocation directory.
    pub fn add_relocation(
        &mut self,
        page_rva: u32,
        entries: &[RelocationEntry],
    ) -> Result<(), EditError> {
        if page_rva % 0x1000 != 0 {
            return Err(EditError::InvalidArgument(
                "relocation page rva must be 4 KiB aligned",
            ));
        }
        if entries.iter().any(|e| e.offset > 0x0FFF) {
            return Err(EditError::InvalidArgument(
                "relocation offset exceeds its 4 KiB page",
            ));
        }
        if !self.relocations.iter().any(|b| b.page_rva == page_rva) {
            self.relocations.push(RelocationBlock::new(page_rva));
            self.relocations.sort_by_key(|b| b.page_rva);
        }
        let block = self
            .relocations
            .iter_mut()
            .find(|b| b.page_rva == page_rva)
            .ok_or(EditError::InvalidState("relocation block vanished"))?;
        block.entries.extend_from_slice(entries);
        self.rebuild_relocations()
    }

    /// Drop every base relocation and clear the directory to `(0, 0)`.
    pub fn remove_all_relocations(&mut self) {
        self.relocations.clear();
        self.directories
            .get_mut(DirectoryType::BaseRelocationTable)
            .clear();
        self.bump();
    }

    // Serialization.

    /// Serialize with the default builder settings.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        Ok(Builder::new().build(self)?)
    }

    /// Serialize with an explicitly configured builder.
    pub fn build_with(&self, builder: &Builder) -> Result<Vec<u8>, Error> {
        Ok(builder.build(self)?)
    }

    /// Serialize and write to `path`.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let bytes = Builder::new().build(self)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    // Internals.

    fn bump(&mut self) {
        self.generation += 1;
    }

    fn recompute_sizeof_image(&mut self) {
        let end = self
            .sections
            .iter()
            .map(Section::end_rva)
            .max()
            .unwrap_or(self.optional.sizeof_headers);
        self.optional.sizeof_image = align_up(end, self.optional.section_alignment);
    }

    /// Next free section-aligned RVA, skipping sections named `except`.
    fn next_virtual_rva(&self, except: Option<&str>) -> u32 {
        let end = self
            .sections
            .iter()
            .filter(|s| except != Some(s.name()))
            .map(Section::end_rva)
            .max()
            .unwrap_or(self.optional.sizeof_headers);
        align_up(
            end.max(self.optional.section_alignment),
            self.optional.section_alignment,
        )
    }

    /// Next free file-aligned raw offset.
    fn next_raw_offset(&self) -> u32 {
        let end = self
            .sections
            .iter()
            .map(Section::end_offset)
            .max()
            .unwrap_or(self.optional.sizeof_headers);
        align_up(
            end.max(self.optional.sizeof_headers),
            self.optional.file_alignment,
        )
    }

    /// Grow the header region for one more section header, failing when
    /// existing raw data sits in the way.
    fn reserve_header_slot(&mut self) -> Result<(), EditError> {
        let needed = align_up(
            raw_headers_size(
                self.dos_stub.len(),
                self.coff.sizeof_optional_header as usize,
                self.sections.len() + 1,
            ),
            self.optional.file_alignment,
        );
        if needed > self.optional.sizeof_headers {
            let blocked = self
                .sections
                .iter()
                .any(|s| s.sizeof_raw_data != 0 && s.pointerto_raw_data < needed);
            if blocked {
                return Err(EditError::InvalidState(
                    "header region is full; no room for another section header",
                ));
            }
            self.optional.sizeof_headers = needed;
        }
        Ok(())
    }

    /// Place a section after the current last one and register it in the
    /// headers. Does not bump the generation; callers do.
    fn insert_section(&mut self, mut section: Section) -> Result<usize, EditError> {
        self.reserve_header_slot()?;

        section.virtual_address = self.next_virtual_rva(None);
        if section.virtual_size == 0 {
            section.virtual_size = section.content.len() as u32;
        }
        section.sizeof_raw_data =
            align_up(section.content.len() as u32, self.optional.file_alignment);
        section.pointerto_raw_data = if section.sizeof_raw_data == 0 {
            0
        } else {
            self.next_raw_offset()
        };

        debug!(
            name = section.name(),
            rva = section.virtual_address,
            offset = section.pointerto_raw_data,
            "section added"
        );

        self.sections.push(section);
        self.coff.numberof_sections = self.sections.len() as u16;
        self.recompute_sizeof_image();
        Ok(self.sections.len() - 1)
    }

    /// Base RVA the next import table rebuild will use.
    fn import_table_base(&self) -> u32 {
        match self.sections.last() {
            Some(last) if last.name() == IMPORT_STAGING => last.virtual_address,
            _ => self.next_virtual_rva(Some(IMPORT_STAGING)),
        }
    }

    /// Re-lay the whole import table into the staging section and point the
    /// import and IAT directories at it. With no imports left, the staging
    /// section is dropped and both directories are cleared.
    fn rebuild_imports(&mut self) -> Result<(), EditError> {
        if self.imports.is_empty() {
            if let Some(index) = self.sections.iter().position(|s| s.name() == IMPORT_STAGING) {
                self.sections.remove(index);
                self.coff.numberof_sections = self.sections.len() as u16;
                self.recompute_sizeof_image();
            }
            self.directories.get_mut(DirectoryType::ImportTable).clear();
            self.directories.get_mut(DirectoryType::Iat).clear();
            self.bump();
            return Ok(());
        }

        let base = self.import_table_base();
        let laid = import::layout(&self.imports, self.optional.kind, base);

        let reuse_last = matches!(self.sections.last(), Some(s) if s.name() == IMPORT_STAGING);
        if reuse_last {
            let file_alignment = self.optional.file_alignment;
            if let Some(last) = self.sections.last_mut() {
                last.virtual_size = laid.bytes.len() as u32;
                last.sizeof_raw_data = align_up(laid.bytes.len() as u32, file_alignment);
                last.content = laid.bytes.clone();
            }
            self.recompute_sizeof_image();
        } else {
            if let Some(index) = self.sections.iter().position(|s| s.name() == IMPORT_STAGING) {
                self.sections.remove(index);
                self.coff.numberof_sections = self.sections.len() as u16;
            }
            let staging = Section::new(
                IMPORT_STAGING,
                laid.bytes.clone(),
                SectionFlags::CNT_INITIALIZED_DATA | SectionFlags::MEM_READ | SectionFlags::MEM_WRITE,
            );
            self.insert_section(staging)?;
        }

        *self.directories.get_mut(DirectoryType::ImportTable) = DataDirectory {
            rva: base,
            size: laid.directory_size,
        };
        *self.directories.get_mut(DirectoryType::Iat) = DataDirectory {
            rva: laid.iat_rva,
            size: laid.iat_size,
        };

        for (library, slots) in self.imports.iter_mut().zip(&laid.slots) {
            for (entry, slot) in library.entries.iter_mut().zip(slots) {
                entry.iat_rva = *slot;
            }
        }

        self.bump();
        Ok(())
    }

    /// Serialize the relocation blocks; patch them over the existing table
    /// when they fit, otherwise stage them in a fresh section.
    fn rebuild_relocations(&mut self) -> Result<(), EditError> {
        let bytes = crate::reloc::serialize(&self.relocations);
        if bytes.is_empty() {
            self.remove_all_relocations();
            return Ok(());
        }

        let dir = self.directories.get(DirectoryType::BaseRelocationTable);
        if dir.is_present() {
            if let Some(section) = self
                .sections
                .iter_mut()
                .find(|s| s.contains_rva(dir.rva) && s.name() != RELOC_STAGING)
            {
                let delta = (dir.rva - section.virtual_address) as usize;
                if delta + bytes.len() <= section.sizeof_raw_data as usize {
                    if section.content.len() < delta + bytes.len() {
                        section.content.resize(delta + bytes.len(), 0);
                    }
                    section.content[delta..delta + bytes.len()].copy_from_slice(&bytes);
                    self.directories
                        .get_mut(DirectoryType::BaseRelocationTable)
                        .size = bytes.len() as u32;
                    self.bump();
                    return Ok(());
                }
            }
        }

        let reuse_last = matches!(self.sections.last(), Some(s) if s.name() == RELOC_STAGING);
        let rva = if reuse_last {
            let file_alignment = self.optional.file_alignment;
            let last = match self.sections.last_mut() {
                Some(last) => last,
                None => return Err(EditError::InvalidState("no sections to stage into")),
            };
            last.virtual_size = bytes.len() as u32;
            last.sizeof_raw_data = align_up(bytes.len() as u32, file_alignment);
            last.content = bytes.clone();
            let rva = last.virtual_address;
            self.recompute_sizeof_image();
            rva
        } else {
            if let Some(index) = self.sections.iter().position(|s| s.name() == RELOC_STAGING) {
                self.sections.remove(index);
                self.coff.numberof_sections = self.sections.len() as u16;
            }
            let staging = Section::new(
                RELOC_STAGING,
                bytes.clone(),
                SectionFlags::CNT_INITIALIZED_DATA
                    | SectionFlags::MEM_READ
                    | SectionFlags::MEM_DISCARDABLE,
            );
            let index = self.insert_section(staging)?;
            self.sections[index].virtual_address
        };

        *self.directories.get_mut(DirectoryType::BaseRelocationTable) = DataDirectory {
            rva,
            size: bytes.len() as u32,
        };
        self.bump();
        Ok(())
    }
}

impl Object for Binary {
    fn entrypoint(&self) -> u64 {
        self.optional.imagebase + self.optional.addressof_entrypoint as u64
    }

    fn imagebase(&self) -> u64 {
        self.optional.imagebase
    }

    fn virtual_size(&self) -> u64 {
        self.optional.sizeof_image as u64
    }

    fn is_64(&self) -> bool {
        self.optional.kind == PeKind::Pe64
    }

    fn imported_libraries(&self) -> Vec<&str> {
        self.imports.iter().map(|i| i.name.as_str()).collect()
    }

    fn exported_names(&self) -> Vec<&str> {
        self.export
            .iter()
            .flat_map(|e| e.entries.iter().filter_map(|entry| entry.name.as_deref()))
            .collect()
    }
}
