//! UPK package symbol tables.
//!
//! Parses the header and the name/import/export tables of a compiled binary
//! game package, following the exact layout implied by the UE3-era loaders
//! (little-endian):
//! - 0x00: u32 magic (0x9E2A83C1)
//! - u16 file_version, u16 licensee_version
//! - u32 header_size
//! - fstr folder_name
//! - u32 package_flags
//! - u32 name_count,   u32 name_offset
//! - u32 export_count, u32 export_offset
//! - u32 import_count, u32 import_offset
//! - u32 depends_offset
//! - [16] guid
//!
//! `fstr` is a serialized string: i32 length, then that many narrow bytes
//! including the trailing NUL; a negative length means UTF-16LE code units.
//!
//! Name table entry: fstr name, u64 flags.
//! Import table entry: u64 class_package, u64 class_name, i32 outer_index,
//! u64 object_name (u32 name index + u32 number each).
//! Export table entry: i32 class_index, i32 super_index, i32 outer_index,
//! u64 object_name, u64 object_flags, u32 serial_size, u32 serial_offset.
//!
//! Object references are signed 32-bit values: 0 is "none", a positive value
//! selects export `ref - 1`, a negative value selects import `-ref - 1`.
//! Virtual-function references live in a separate namespace: they are plain
//! name-table indices, and index 0 is a legitimate value there.

use std::collections::HashMap;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use once_cell::sync::OnceCell;

use crate::error::PackageFormatError;

pub const UPK_MAGIC: u32 = 0x9E2A_83C1;

#[derive(Debug, Clone)]
pub struct NameEntry {
    pub name: String,
    pub flags: u64,
}

#[derive(Debug, Clone)]
pub struct ImportEntry {
    pub class_package: u32,
    pub class_name: u32,
    pub outer_index: i32,
    pub name_index: u32,
    pub name_number: u32,
}

#[derive(Debug, Clone)]
pub struct ExportEntry {
    pub class_index: i32,
    pub super_index: i32,
    pub outer_index: i32,
    pub name_index: u32,
    pub name_number: u32,
    pub object_flags: u64,
    pub serial_size: u32,
    pub serial_offset: u32,
}

/// An immutable view over one parsed package: header fields plus the three
/// symbol tables. Reverse indices are built lazily on first reverse lookup
/// and cached for the package's lifetime (the tables are read-only).
#[derive(Debug)]
pub struct UpkPackage {
    version: u16,
    licensee_version: u16,
    package_flags: u32,
    folder_name: String,
    guid: [u8; 16],
    names: Vec<NameEntry>,
    imports: Vec<ImportEntry>,
    exports: Vec<ExportEntry>,

    object_index: OnceCell<HashMap<String, i32>>,
    vf_index: OnceCell<HashMap<String, u32>>,
}

/// Bounds-checked cursor over the package buffer.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn at(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    fn take(&mut self, len: usize, what: &'static str) -> Result<&'a [u8], PackageFormatError> {
        if self.pos + len > self.buf.len() {
            return Err(PackageFormatError::UnexpectedEof {
                what,
                offset: self.pos,
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u16(&mut self, what: &'static str) -> Result<u16, PackageFormatError> {
        Ok(LittleEndian::read_u16(self.take(2, what)?))
    }

    fn u32(&mut self, what: &'static str) -> Result<u32, PackageFormatError> {
        Ok(LittleEndian::read_u32(self.take(4, what)?))
    }

    fn i32(&mut self, what: &'static str) -> Result<i32, PackageFormatError> {
        Ok(LittleEndian::read_i32(self.take(4, what)?))
    }

    fn u64(&mut self, what: &'static str) -> Result<u64, PackageFormatError> {
        Ok(LittleEndian::read_u64(self.take(8, what)?))
    }

    /// Serialized string: i32 length, then narrow bytes (positive length) or
    /// UTF-16LE code units (negative length), both including the NUL.
    fn fstring(&mut self, what: &'static str) -> Result<String, PackageFormatError> {
        let start = self.pos;
        let len = self.i32(what)?;
        if len == 0 {
            return Ok(String::new());
        }
        if len > 0 {
            let bytes = self.take(len as usize, what)?;
            let Some((&0, body)) = bytes.split_last() else {
                return Err(PackageFormatError::BadString {
                    offset: start,
                    reason: "narrow string is not NUL-terminated",
                });
            };
            let (decoded, had_errors) = encoding_rs::WINDOWS_1252.decode_without_bom_handling(body);
            if had_errors {
                log::warn!("undecodable bytes in narrow string at 0x{:X}", start);
            }
            Ok(decoded.into_owned())
        } else {
            let units = (-(len as i64)) as usize;
            let bytes = self.take(units * 2, what)?;
            if LittleEndian::read_u16(&bytes[bytes.len() - 2..]) != 0 {
                return Err(PackageFormatError::BadString {
                    offset: start,
                    reason: "wide string is not NUL-terminated",
                });
            }
            let (decoded, had_errors) =
                encoding_rs::UTF_16LE.decode_without_bom_handling(&bytes[..bytes.len() - 2]);
            if had_errors {
                log::warn!("undecodable code units in wide string at 0x{:X}", start);
            }
            Ok(decoded.into_owned())
        }
    }
}

impl UpkPackage {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PackageFormatError> {
        let bytes = std::fs::read(path)?;
        Self::parse(&bytes)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, PackageFormatError> {
        let mut r = Reader::new(bytes);

        let magic = r.u32("magic")?;
        if magic != UPK_MAGIC {
            return Err(PackageFormatError::BadMagic { magic });
        }
        let version = r.u16("file_version")?;
        let licensee_version = r.u16("licensee_version")?;
        if version == 0 {
            return Err(PackageFormatError::UnsupportedVersion {
                version,
                licensee: licensee_version,
            });
        }
        let _header_size = r.u32("header_size")?;
        let folder_name = r.fstring("folder_name")?;
        let package_flags = r.u32("package_flags")?;

        let name_count = r.u32("name_count")?;
        let name_offset = r.u32("name_offset")?;
        let export_count = r.u32("export_count")?;
        let export_offset = r.u32("export_offset")?;
        let import_count = r.u32("import_count")?;
        let import_offset = r.u32("import_offset")?;
        let _depends_offset = r.u32("depends_offset")?;

        let guid: [u8; 16] = r.take(16, "guid")?.try_into().unwrap();

        let names = Self::parse_names(bytes, name_offset, name_count)?;
        let imports = Self::parse_imports(bytes, import_offset, import_count)?;
        let exports = Self::parse_exports(bytes, export_offset, export_count)?;

        // every table row must point at a real name
        for index in imports
            .iter()
            .map(|i| i.name_index)
            .chain(exports.iter().map(|e| e.name_index))
        {
            if index >= name_count {
                return Err(PackageFormatError::NameIndexOutOfRange {
                    index,
                    count: name_count,
                });
            }
        }

        Ok(Self {
            version,
            licensee_version,
            package_flags,
            folder_name,
            guid,
            names,
            imports,
            exports,
            object_index: OnceCell::new(),
            vf_index: OnceCell::new(),
        })
    }

    fn check_table(
        bytes: &[u8],
        table: &'static str,
        offset: u32,
        count: u32,
    ) -> Result<(), PackageFormatError> {
        if count > 0 && offset as usize >= bytes.len() {
            return Err(PackageFormatError::TableOutOfRange {
                table,
                offset,
                count,
                len: bytes.len(),
            });
        }
        Ok(())
    }

    fn parse_names(
        bytes: &[u8],
        offset: u32,
        count: u32,
    ) -> Result<Vec<NameEntry>, PackageFormatError> {
        Self::check_table(bytes, "name", offset, count)?;
        let mut r = Reader::at(bytes, offset as usize);
        let mut names = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let name = r.fstring("name entry")?;
            let flags = r.u64("name flags")?;
            names.push(NameEntry { name, flags });
        }
        Ok(names)
    }

    fn parse_imports(
        bytes: &[u8],
        offset: u32,
        count: u32,
    ) -> Result<Vec<ImportEntry>, PackageFormatError> {
        Self::check_table(bytes, "import", offset, count)?;
        let mut r = Reader::at(bytes, offset as usize);
        let mut imports = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let class_package = r.u32("import class_package")?;
            let _class_package_number = r.u32("import class_package number")?;
            let class_name = r.u32("import class_name")?;
            let _class_name_number = r.u32("import class_name number")?;
            let outer_index = r.i32("import outer_index")?;
            let name_index = r.u32("import object_name")?;
            let name_number = r.u32("import object_name number")?;
            imports.push(ImportEntry {
                class_package,
                class_name,
                outer_index,
                name_index,
                name_number,
            });
        }
        Ok(imports)
    }

    fn parse_exports(
        bytes: &[u8],
        offset: u32,
        count: u32,
    ) -> Result<Vec<ExportEntry>, PackageFormatError> {
        Self::check_table(bytes, "export", offset, count)?;
        let mut r = Reader::at(bytes, offset as usize);
        let mut exports = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let class_index = r.i32("export class_index")?;
            let super_index = r.i32("export super_index")?;
            let outer_index = r.i32("export outer_index")?;
            let name_index = r.u32("export object_name")?;
            let name_number = r.u32("export object_name number")?;
            let object_flags = r.u64("export object_flags")?;
            let serial_size = r.u32("export serial_size")?;
            let serial_offset = r.u32("export serial_offset")?;
            exports.push(ExportEntry {
                class_index,
                super_index,
                outer_index,
                name_index,
                name_number,
                object_flags,
                serial_size,
                serial_offset,
            });
        }
        Ok(exports)
    }

    pub fn guid(&self) -> &[u8; 16] {
        &self.guid
    }

    pub fn version(&self) -> (u16, u16) {
        (self.version, self.licensee_version)
    }

    pub fn package_flags(&self) -> u32 {
        self.package_flags
    }

    pub fn folder_name(&self) -> &str {
        &self.folder_name
    }

    pub fn names(&self) -> &[NameEntry] {
        &self.names
    }

    pub fn imports(&self) -> &[ImportEntry] {
        &self.imports
    }

    pub fn exports(&self) -> &[ExportEntry] {
        &self.exports
    }

    /// Forward lookup in the ordinary namespace: the fully qualified name of
    /// the import or export selected by `reference` (outer chain joined with
    /// `.`, outermost first), or `None` for 0 and dangling references.
    pub fn object_name(&self, reference: i32) -> Option<String> {
        if reference == 0 {
            return None;
        }
        let mut parts = Vec::new();
        let mut current = reference;
        // outer chains are acyclic in well-formed packages; cap the walk so a
        // corrupt one cannot loop forever
        let max_hops = self.imports.len() + self.exports.len();
        for _ in 0..=max_hops {
            if current == 0 {
                parts.reverse();
                return Some(parts.join("."));
            }
            let (name_index, outer_index) = if current > 0 {
                let entry = self.exports.get(current as usize - 1)?;
                (entry.name_index, entry.outer_index)
            } else {
                let entry = self.imports.get((-(current as i64) - 1) as usize)?;
                (entry.name_index, entry.outer_index)
            };
            parts.push(self.names.get(name_index as usize)?.name.as_str());
            current = outer_index;
        }
        log::warn!("cyclic outer chain starting at reference {}", reference);
        None
    }

    /// Forward lookup in the virtual-function namespace: a plain name-table
    /// access. Index 0 is a valid entry here.
    pub fn vf_name(&self, index: i32) -> Option<&str> {
        if index < 0 {
            return None;
        }
        self.names.get(index as usize).map(|e| e.name.as_str())
    }

    /// Reverse lookup in the ordinary namespace. Exports shadow imports with
    /// the same qualified name; within one table the first entry wins.
    pub fn find_object(&self, name: &str) -> Option<i32> {
        let index = self.object_index.get_or_init(|| {
            let mut map = HashMap::new();
            for reference in (1..=self.exports.len() as i32)
                .chain((1..=self.imports.len() as i64).map(|i| (-i) as i32))
            {
                if let Some(qualified) = self.object_name(reference) {
                    map.entry(qualified).or_insert(reference);
                }
            }
            map
        });
        index.get(name).copied()
    }

    /// Reverse lookup in the virtual-function namespace. The first name-table
    /// entry with a matching name wins; 0 is a legitimate result.
    pub fn find_vf(&self, name: &str) -> Option<u32> {
        let index = self.vf_index.get_or_init(|| {
            let mut map = HashMap::new();
            for (i, entry) in self.names.iter().enumerate() {
                map.entry(entry.name.clone()).or_insert(i as u32);
            }
            map
        });
        index.get(name).copied()
    }

    /// Sentinel form of [`find_object`](Self::find_object): 0 means "not
    /// found" (ordinary references are never 0).
    pub fn find_object_ref(&self, name: &str) -> i32 {
        self.find_object(name).unwrap_or(0)
    }

    /// Sentinel form of [`find_vf`](Self::find_vf): -1 means "not found".
    /// 0 cannot serve as the sentinel because it is a valid index in this
    /// namespace.
    pub fn find_vf_index(&self, name: &str) -> i64 {
        self.find_vf(name).map(i64::from).unwrap_or(-1)
    }
}
