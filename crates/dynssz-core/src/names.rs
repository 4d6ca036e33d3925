//! Type-name printing and import bookkeeping.
//!
//! Whenever an emitter refers to a host type it goes through [`TypePrinter`],
//! which returns the name to print in the generated source and records the
//! package of origin for the file's `use` block. Alias collisions between
//! same-named types from different packages are resolved by suffixing
//! integers.

use std::collections::HashSet;

use indexmap::IndexMap;

use dynssz_descriptor::{TypeDescriptor, TypeKind, TypeRef};

use crate::error::{EmitError, EmitResult};

/// Path of the runtime support crate referenced by emitted code.
pub const RT: &str = "dynssz_rt";

#[derive(Debug, Clone)]
pub struct TypePrinter {
    current_package: String,
    /// full import path -> local alias, in first-use order
    imports: IndexMap<String, String>,
    taken: HashSet<String>,
}

impl TypePrinter {
    pub fn new(current_package: impl Into<String>) -> Self {
        Self {
            current_package: current_package.into(),
            imports: IndexMap::new(),
            taken: HashSet::new(),
        }
    }

    pub fn current_package(&self) -> &str {
        &self.current_package
    }

    /// Printable name for a named host type, registering its package.
    pub fn type_name(&mut self, r: &TypeRef) -> EmitResult<String> {
        if r.name.is_empty() {
            return Err(EmitError::UnresolvableExternalType(format!(
                "{}::<anonymous>",
                r.package
            )));
        }
        if r.package.is_empty() || r.package == self.current_package {
            return Ok(r.name.clone());
        }
        let path = format!("{}::{}", r.package, r.name);
        if let Some(alias) = self.imports.get(&path) {
            return Ok(alias.clone());
        }
        let alias = self.fresh_alias(&r.name);
        self.imports.insert(path, alias.clone());
        Ok(alias)
    }

    fn fresh_alias(&mut self, base: &str) -> String {
        if self.taken.insert(base.to_string()) {
            return base.to_string();
        }
        let mut n = 1usize;
        loop {
            let candidate = format!("{base}{n}");
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }

    /// The Rust type of the host value described by `d`, as printed in
    /// emitted signatures and locals. Registers imports as a side effect.
    pub fn rust_type(&mut self, d: &TypeDescriptor) -> EmitResult<String> {
        let inner = self.rust_type_inner(d)?;
        Ok(if d.flags.is_pointer {
            format!("Option<{inner}>")
        } else {
            inner
        })
    }

    fn rust_type_inner(&mut self, d: &TypeDescriptor) -> EmitResult<String> {
        let name = match d.kind {
            TypeKind::Bool => "bool".to_string(),
            TypeKind::Uint8 => "u8".to_string(),
            TypeKind::Uint16 => "u16".to_string(),
            TypeKind::Uint32 => "u32".to_string(),
            TypeKind::Uint64 => {
                if d.flags.is_time {
                    "std::time::SystemTime".to_string()
                } else {
                    "u64".to_string()
                }
            }
            TypeKind::Uint128 => "[u8; 16]".to_string(),
            TypeKind::Uint256 => "[u8; 32]".to_string(),
            TypeKind::Bitvector | TypeKind::Bitlist | TypeKind::ProgressiveBitlist => {
                "Vec<u8>".to_string()
            }
            TypeKind::Vector | TypeKind::List | TypeKind::ProgressiveList => {
                if d.flags.is_string {
                    "String".to_string()
                } else if d.flags.is_byte_array {
                    "Vec<u8>".to_string()
                } else {
                    let elem = d
                        .elem()
                        .ok_or_else(|| EmitError::UnknownKind(format!("{:?} without element", d.kind)))?;
                    format!("Vec<{}>", self.rust_type(elem)?)
                }
            }
            TypeKind::Union => format!("{RT}::SszUnion"),
            TypeKind::Container
            | TypeKind::ProgressiveContainer
            | TypeKind::Wrapper
            | TypeKind::Custom => {
                let r = d.type_ref.as_ref().ok_or_else(|| {
                    EmitError::UnresolvableExternalType(format!("{:?} without type reference", d.kind))
                })?;
                self.type_name(r)?
            }
        };
        Ok(name)
    }

    /// Rendered `use` lines in registration order.
    pub fn use_lines(&self) -> Vec<String> {
        self.imports
            .iter()
            .map(|(path, alias)| {
                let last = path.rsplit("::").next().unwrap_or(path);
                if last == alias {
                    format!("use {path};")
                } else {
                    format!("use {path} as {alias};")
                }
            })
            .collect()
    }

    pub fn has_imports(&self) -> bool {
        !self.imports.is_empty()
    }
}
