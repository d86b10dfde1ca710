//! Whole-file parser: raw bytes in, [`Binary`] out.
//!
//! Header corruption (DOS magic, PE signature, optional magic, truncation)
//! fails the parse. A data directory that fails to decode does not: the
//! affected entity is left absent, the raw (rva, size) pair is kept, and a
//! warning is logged, so one rotten directory cannot hide the rest of an
//! otherwise readable file.

use tracing::{debug, warn};

use crate::binary::Binary;
use crate::coff::{self, CoffHeader};
use crate::data_dir::{DirectoryTable, DirectoryType, NUMBEROF_DIRECTORIES};
use crate::dos::DosHeader;
use crate::error::ParseError;
use crate::optional::OptionalHeader;
use crate::section::{Section, SECTION_HEADER_SIZE};
use crate::view::ByteView;
use crate::{debug as debug_dir, export, import, reloc, resource, signature, symbol, tls};

/// Parse a PE image from `data`.
pub fn parse(data: &[u8]) -> Result<Binary, ParseError> {
    let view = ByteView::new(data);

    let dos = DosHeader::parse(&view)?;
    let pe_offset = dos.addressof_new_exeheader as usize;
    if pe_offset < DosHeader::SIZE {
        return Err(ParseError::Malformed("e_lfanew overlaps the DOS header"));
    }
    let dos_stub = view.slice(DosHeader::SIZE, pe_offset - DosHeader::SIZE)?.to_vec();

    coff::check_pe_magic(&view, pe_offset)?;
    let coff = CoffHeader::parse(&view, pe_offset + 4)?;

    let optional_offset = pe_offset + 4 + CoffHeader::SIZE;
    let optional = OptionalHeader::parse(&view, optional_offset)?;

    // The directory table is bounded twice: by the declared count and by
    // the space the COFF header reserves for the optional header.
    let declared = optional.numberof_rva_and_size as usize;
    let reserved = (coff.sizeof_optional_header as usize)
        .saturating_sub(optional.base_size())
        / 8;
    let count = declared.min(reserved).min(NUMBEROF_DIRECTORIES);
    if count < declared {
        warn!(declared, kept = count, "directory count clamped");
    }
    let directories =
        DirectoryTable::parse(&view, optional_offset + optional.base_size(), count)?;

    let table_offset = optional_offset + coff.sizeof_optional_header as usize;
    let sections = parse_sections(&view, table_offset, coff.numberof_sections)?;

    // Overlay: everything past the last byte any header or section claims.
    let headers_end = table_offset + sections.len() * SECTION_HEADER_SIZE;
    let mut body_end = headers_end.max(optional.sizeof_headers as usize);
    for section in &sections {
        body_end = body_end.max(section.end_offset() as usize);
    }
    body_end = body_end.min(data.len());
    let overlay = data[body_end..].to_vec();

    let mut binary = Binary {
        dos,
        dos_stub,
        coff,
        optional,
        baseline_directories: directories.clone(),
        directories,
        sections,
        imports: Vec::new(),
        export: None,
        relocations: Vec::new(),
        tls: None,
        debug_entries: Vec::new(),
        resources: None,
        certificates: Vec::new(),
        symbols: Vec::new(),
        overlay,
        generation: 0,
    };
    parse_directories(&view, &mut binary);
    parse_symbols(&view, &mut binary);

    debug!(
        sections = binary.sections.len(),
        imports = binary.imports.len(),
        overlay = binary.overlay.len(),
        "parsed image"
    );
    Ok(binary)
}

fn parse_sections(
    view: &ByteView<'_>,
    table_offset: usize,
    count: u16,
) -> Result<Vec<Section>, ParseError> {
    let mut sections = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let mut section = Section::parse_header(view, table_offset + i * SECTION_HEADER_SIZE)?;

        // Content clamped to the file; the declared sizes stay untouched so
        // an unedited rebuild reproduces them.
        let start = section.pointerto_raw_data as usize;
        let declared = section.sizeof_raw_data as usize;
        if declared != 0 {
            if start >= view.len() {
                warn!(name = section.name(), "section raw data lies past the file end");
            } else {
                let available = view.len() - start;
                if available < declared {
                    warn!(
                        name = section.name(),
                        declared,
                        available,
                        "section raw data truncated by the file end"
                    );
                }
                section.content = view.slice(start, declared.min(available))?.to_vec();
            }
        }
        sections.push(section);
    }
    Ok(sections)
}

fn parse_directories(view: &ByteView<'_>, binary: &mut Binary) {
    let kind = binary.optional.kind;
    let sections = &binary.sections;

    let dir = binary.directories.get(DirectoryType::ImportTable);
    if dir.is_present() {
        match import::parse(view, sections, dir.rva, kind) {
            Ok(imports) => binary.imports = imports,
            Err(err) => warn!(error = %err, "import table failed to decode"),
        }
    }

    let dir = binary.directories.get(DirectoryType::ExportTable);
    if dir.is_present() {
        match export::parse(view, sections, dir) {
            Ok(export) => binary.export = Some(export),
            Err(err) => warn!(error = %err, "export table failed to decode"),
        }
    }

    let dir = binary.directories.get(DirectoryType::BaseRelocationTable);
    if dir.is_present() {
        match reloc::parse(view, sections, dir) {
            Ok(blocks) => binary.relocations = blocks,
            Err(err) => warn!(error = %err, "relocation table failed to decode"),
        }
    }

    let dir = binary.directories.get(DirectoryType::TlsTable);
    if dir.is_present() {
        match tls::parse(view, sections, binary.optional.imagebase, kind, dir) {
            Ok(tls) => binary.tls = Some(tls),
            Err(err) => warn!(error = %err, "tls directory failed to decode"),
        }
    }

    let dir = binary.directories.get(DirectoryType::Debug);
    if dir.is_present() {
        match debug_dir::parse(view, sections, dir) {
            Ok(entries) => binary.debug_entries = entries,
            Err(err) => warn!(error = %err, "debug directory failed to decode"),
        }
    }

    let dir = binary.directories.get(DirectoryType::ResourceTable);
    if dir.is_present() {
        match resource::parse(view, sections, dir) {
            Ok(root) => binary.resources = Some(root),
            Err(err) => warn!(error = %err, "resource tree failed to decode"),
        }
    }

    let dir = binary.directories.get(DirectoryType::CertificateTable);
    if dir.is_present() {
        match signature::parse(view, dir) {
            Ok(certs) => binary.certificates = certs,
            Err(err) => warn!(error = %err, "certificate table failed to decode"),
        }
    }
}

fn parse_symbols(view: &ByteView<'_>, binary: &mut Binary) {
    match symbol::parse(
        view,
        binary.coff.pointerto_symbol_table,
        binary.coff.numberof_symbols,
    ) {
        Ok(symbols) => binary.symbols = symbols,
        Err(err) => warn!(error = %err, "coff symbol table failed to decode"),
    }
}
