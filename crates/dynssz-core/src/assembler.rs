//! File assembly.
//!
//! Composes the per-type `impl` blocks out of the four operation emitters
//! and wraps each operation in the signature matrix the generation options
//! ask for: a static variant, a dynamic variant taking a spec dictionary
//! (real when an expression was interned, a thin wrapper otherwise), and an
//! optional legacy shim resolving the process-wide default dictionary.

use dynssz_descriptor::TypeDescriptor;

use crate::builder::CodeBuilder;
use crate::emit::{
    deserialize::emit_deserialize_body, hash::emit_hash_body, serialize::emit_serialize_body,
    size::emit_size_body, EmitEnv, EmittedBody, WriterMode,
};
use crate::error::{EmitError, EmitResult};
use crate::names::{TypePrinter, RT};
use crate::TypeGenOptions;

/// Signature set for one operation's variant family.
struct OpSignatures {
    static_sig: String,
    dyn_sig: String,
    legacy_sig: String,
    /// Thin-wrapper body: delegate the dynamic variant to the static one.
    wrapper_call: String,
    /// Legacy body: delegate to the dynamic variant under the default specs.
    legacy_call: String,
    /// Legacy body when dynamic expressions are disabled entirely.
    legacy_static_call: String,
}

fn signatures(name: &str, receiver: &str, params: &str, args: &str, ret: &str) -> OpSignatures {
    let comma_params = if params.is_empty() {
        String::new()
    } else {
        format!(", {params}")
    };
    let comma_args = if args.is_empty() {
        String::new()
    } else {
        format!(", {args}")
    };
    OpSignatures {
        static_sig: format!("pub fn {name}({receiver}{comma_params}) -> {ret}"),
        dyn_sig: format!(
            "pub fn {name}_dyn({receiver}, specs: &{RT}::DynSpecs{comma_params}) -> {ret}"
        ),
        legacy_sig: format!("pub fn {name}_legacy({receiver}{comma_params}) -> {ret}"),
        wrapper_call: format!("self.{name}({args})"),
        legacy_call: format!("self.{name}_dyn({RT}::default_specs(){comma_args})"),
        legacy_static_call: format!("self.{name}({args})"),
    }
}

fn wrap_fn(sig: &str, body: &str) -> String {
    let mut b = CodeBuilder::new();
    b.open(format!("{sig} {{"));
    b.lines(body);
    b.close("}");
    b.finish()
}

/// Emit the static/dynamic/legacy family for one operation.
fn op_methods(
    printer: &mut TypePrinter,
    opts: &TypeGenOptions,
    sigs: &OpSignatures,
    emit: &mut dyn FnMut(&mut EmitEnv<'_>) -> EmitResult<EmittedBody>,
) -> EmitResult<Vec<String>> {
    let mut out = Vec::new();
    if opts.without_dynamic_expressions {
        let mut env = EmitEnv::new(printer, false, opts.no_fast_path);
        let body = emit(&mut env)?;
        out.push(wrap_fn(&sigs.static_sig, &body.code));
        if opts.emit_legacy_shim {
            out.push(wrap_fn(&sigs.legacy_sig, &sigs.legacy_static_call));
        }
        return Ok(out);
    }

    // The static body is always emitted: even a spec-independent dynamic
    // body threads the dictionary through its helper signatures and cannot
    // stand in for it.
    let static_body = {
        let mut env = EmitEnv::new(printer, false, opts.no_fast_path);
        emit(&mut env)?
    };
    out.push(wrap_fn(&sigs.static_sig, &static_body.code));
    let dyn_body = {
        let mut env = EmitEnv::new(printer, true, opts.no_fast_path);
        emit(&mut env)?
    };
    if dyn_body.used_specs {
        out.push(wrap_fn(&sigs.dyn_sig, &dyn_body.code));
    } else {
        // Nothing consulted the dictionary: delegate to the static variant.
        out.push(wrap_fn(&sigs.dyn_sig, &sigs.wrapper_call));
    }
    if opts.emit_legacy_shim {
        out.push(wrap_fn(&sigs.legacy_sig, &sigs.legacy_call));
    }
    Ok(out)
}

/// The full `impl` block for one requested type.
pub(crate) fn emit_type_impl(
    printer: &mut TypePrinter,
    d: &TypeDescriptor,
    opts: &TypeGenOptions,
) -> EmitResult<String> {
    let type_ref = d.type_ref.as_ref().ok_or_else(|| {
        EmitError::UnresolvableExternalType(format!("top-level {:?} without type reference", d.kind))
    })?;
    let type_name = printer.type_name(type_ref)?;

    let mut methods: Vec<String> = Vec::new();

    if !opts.omit_serialize {
        let buffered = signatures(
            "ssz_append",
            "&self",
            "buf: &mut Vec<u8>",
            "buf",
            &format!("Result<(), {RT}::SszError>"),
        );
        methods.extend(op_methods(printer, opts, &buffered, &mut |env| {
            emit_serialize_body(env, d, WriterMode::Seekable)
        })?);

        let streaming = signatures(
            "ssz_write",
            "&self",
            &format!("w: &mut dyn {RT}::SszWriter"),
            "w",
            &format!("Result<(), {RT}::SszError>"),
        );
        methods.extend(op_methods(printer, opts, &streaming, &mut |env| {
            emit_serialize_body(env, d, WriterMode::Streaming)
        })?);

        methods.push(wrap_fn(
            &format!("pub fn ssz_to_bytes(&self) -> Result<Vec<u8>, {RT}::SszError>"),
            "let mut buf = Vec::new();\nself.ssz_append(&mut buf)?;\nOk(buf)",
        ));
        if !opts.without_dynamic_expressions {
            methods.push(wrap_fn(
                &format!(
                    "pub fn ssz_to_bytes_dyn(&self, specs: &{RT}::DynSpecs) -> Result<Vec<u8>, {RT}::SszError>"
                ),
                "let mut buf = Vec::new();\nself.ssz_append_dyn(specs, &mut buf)?;\nOk(buf)",
            ));
        }
    }

    if !opts.omit_deserialize {
        let read = signatures(
            "ssz_read",
            "&mut self",
            &format!("dec: &mut {RT}::Decoder<'_>"),
            "dec",
            &format!("Result<(), {RT}::SszError>"),
        );
        methods.extend(op_methods(printer, opts, &read, &mut |env| {
            emit_deserialize_body(env, d)
        })?);

        methods.push(wrap_fn(
            &format!("pub fn ssz_from_bytes(bytes: &[u8]) -> Result<Self, {RT}::SszError>"),
            &format!(
                "let mut value = Self::default();\nlet mut dec = {RT}::Decoder::new(bytes);\nvalue.ssz_read(&mut dec)?;\ndec.finish()?;\nOk(value)"
            ),
        ));
        if !opts.without_dynamic_expressions {
            methods.push(wrap_fn(
                &format!(
                    "pub fn ssz_from_bytes_dyn(specs: &{RT}::DynSpecs, bytes: &[u8]) -> Result<Self, {RT}::SszError>"
                ),
                &format!(
                    "let mut value = Self::default();\nlet mut dec = {RT}::Decoder::new(bytes);\nvalue.ssz_read_dyn(specs, &mut dec)?;\ndec.finish()?;\nOk(value)"
                ),
            ));
        }
    }

    if !opts.omit_size {
        let size = signatures(
            "ssz_size",
            "&self",
            "",
            "",
            &format!("Result<usize, {RT}::SszError>"),
        );
        methods.extend(op_methods(printer, opts, &size, &mut |env| {
            emit_size_body(env, d)
        })?);
    }

    if !opts.omit_hash {
        let hash = signatures(
            "ssz_hash_root",
            "&self",
            "",
            "",
            &format!("Result<[u8; 32], {RT}::SszError>"),
        );
        methods.extend(op_methods(printer, opts, &hash, &mut |env| {
            emit_hash_body(env, d)
        })?);
    }

    let mut b = CodeBuilder::new();
    b.open(format!("impl {type_name} {{"));
    for (i, method) in methods.iter().enumerate() {
        if i > 0 {
            b.blank();
        }
        b.lines(method);
    }
    b.close("}");
    Ok(b.finish())
}

/// The final file: generated-code banner, lint silencers for the generated
/// style, the import block, then the `impl` blocks in request order.
pub(crate) fn assemble_file(package: &str, printer: &TypePrinter, blocks: &[String]) -> String {
    let mut b = CodeBuilder::new();
    b.line(format!(
        "// Code generated by dynssz for package `{package}`; DO NOT EDIT."
    ));
    b.line("#![allow(clippy::all)]");
    b.line("#![allow(unused_variables, unused_mut, unused_assignments, unreachable_code)]");
    b.blank();
    if printer.has_imports() {
        for l in printer.use_lines() {
            b.line(l);
        }
        b.blank();
    }
    for (i, block) in blocks.iter().enumerate() {
        if i > 0 {
            b.blank();
        }
        b.lines(block);
    }
    b.finish()
}
