//! Test fixtures: build small synthetic UPK packages in memory.
//!
//! Kept as a regular module so integration tests and downstream tools can
//! assemble packages without shipping binary testcase files.

use std::collections::HashMap;

pub fn put_u16_le(value: u16, buffer: &mut Vec<u8>) {
    buffer.extend_from_slice(&value.to_le_bytes());
}

pub fn put_u32_le(value: u32, buffer: &mut Vec<u8>) {
    buffer.extend_from_slice(&value.to_le_bytes());
}

pub fn put_u64_le(value: u64, buffer: &mut Vec<u8>) {
    buffer.extend_from_slice(&value.to_le_bytes());
}

fn put_fstring(content: &str, buffer: &mut Vec<u8>) {
    // narrow form only; test names are ASCII
    put_u32_le(content.len() as u32 + 1, buffer);
    buffer.extend_from_slice(content.as_bytes());
    buffer.push(0);
}

struct ImportRow {
    class_package: u32,
    class_name: u32,
    outer_index: i32,
    name_index: u32,
}

struct ExportRow {
    class_index: i32,
    super_index: i32,
    outer_index: i32,
    name_index: u32,
}

/// Builds the byte image of a package whose symbol tables contain exactly
/// what a test asks for. `import`/`export` return the signed object
/// reference selecting the new row, usable as an `outer` for later rows.
pub struct PackageBuilder {
    version: u16,
    licensee_version: u16,
    guid: [u8; 16],
    names: Vec<String>,
    name_ids: HashMap<String, u32>,
    imports: Vec<ImportRow>,
    exports: Vec<ExportRow>,
}

impl PackageBuilder {
    pub fn new(guid: [u8; 16]) -> Self {
        Self {
            version: 845,
            licensee_version: 64,
            guid,
            names: Vec::new(),
            name_ids: HashMap::new(),
            imports: Vec::new(),
            exports: Vec::new(),
        }
    }

    /// Intern a name-table entry, returning its index.
    pub fn name(&mut self, name: &str) -> u32 {
        if let Some(&id) = self.name_ids.get(name) {
            return id;
        }
        let id = self.names.len() as u32;
        self.names.push(name.to_owned());
        self.name_ids.insert(name.to_owned(), id);
        id
    }

    pub fn import(
        &mut self,
        class_package: &str,
        class_name: &str,
        outer: i32,
        name: &str,
    ) -> i32 {
        let row = ImportRow {
            class_package: self.name(class_package),
            class_name: self.name(class_name),
            outer_index: outer,
            name_index: self.name(name),
        };
        self.imports.push(row);
        -(self.imports.len() as i32)
    }

    pub fn export(&mut self, class: i32, superclass: i32, outer: i32, name: &str) -> i32 {
        let row = ExportRow {
            class_index: class,
            super_index: superclass,
            outer_index: outer,
            name_index: self.name(name),
        };
        self.exports.push(row);
        self.exports.len() as i32
    }

    pub fn build(&self) -> Vec<u8> {
        let mut name_blob = Vec::new();
        for name in &self.names {
            put_fstring(name, &mut name_blob);
            put_u64_le(0, &mut name_blob);
        }

        let mut export_blob = Vec::new();
        for row in &self.exports {
            put_u32_le(row.class_index as u32, &mut export_blob);
            put_u32_le(row.super_index as u32, &mut export_blob);
            put_u32_le(row.outer_index as u32, &mut export_blob);
            put_u32_le(row.name_index, &mut export_blob);
            put_u32_le(0, &mut export_blob); // name number
            put_u64_le(0, &mut export_blob); // object flags
            put_u32_le(0, &mut export_blob); // serial size
            put_u32_le(0, &mut export_blob); // serial offset
        }

        let mut import_blob = Vec::new();
        for row in &self.imports {
            put_u32_le(row.class_package, &mut import_blob);
            put_u32_le(0, &mut import_blob);
            put_u32_le(row.class_name, &mut import_blob);
            put_u32_le(0, &mut import_blob);
            put_u32_le(row.outer_index as u32, &mut import_blob);
            put_u32_le(row.name_index, &mut import_blob);
            put_u32_le(0, &mut import_blob);
        }

        let folder = "None";
        let header_len = 4 + 2 + 2 + 4 + (4 + folder.len() + 1) + 4 + 6 * 4 + 4 + 16;
        let name_offset = header_len as u32;
        let export_offset = name_offset + name_blob.len() as u32;
        let import_offset = export_offset + export_blob.len() as u32;

        let mut data = Vec::new();
        put_u32_le(crate::format::package::UPK_MAGIC, &mut data);
        put_u16_le(self.version, &mut data);
        put_u16_le(self.licensee_version, &mut data);
        put_u32_le(header_len as u32, &mut data);
        put_fstring(folder, &mut data);
        put_u32_le(0, &mut data); // package flags
        put_u32_le(self.names.len() as u32, &mut data);
        put_u32_le(name_offset, &mut data);
        put_u32_le(self.exports.len() as u32, &mut data);
        put_u32_le(export_offset, &mut data);
        put_u32_le(self.imports.len() as u32, &mut data);
        put_u32_le(import_offset, &mut data);
        put_u32_le(0, &mut data); // depends offset
        data.extend_from_slice(&self.guid);
        debug_assert_eq!(data.len(), header_len);

        data.extend_from_slice(&name_blob);
        data.extend_from_slice(&export_blob);
        data.extend_from_slice(&import_blob);
        data
    }
}
