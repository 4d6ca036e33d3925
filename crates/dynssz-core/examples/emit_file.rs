//! Emit SSZ methods for a small beacon-style type set and print the file.
//!
//! ```sh
//! cargo run -p dynssz-core --example emit_file
//! ```

use dynssz_core::{FileRequest, SszGenPipeline, TypeRequest};
use dynssz_descriptor::{TypeDescriptor, TypeRef};

fn main() -> anyhow::Result<()> {
    let checkpoint = TypeDescriptor::container(
        TypeRef::new("types", "Checkpoint"),
        vec![
            ("epoch", TypeDescriptor::uint64()),
            ("root", TypeDescriptor::byte_vector(32)),
        ],
    );

    let attestation = TypeDescriptor::container(
        TypeRef::new("types", "Attestation"),
        vec![
            (
                "aggregation_bits",
                TypeDescriptor::bitlist(2048).pointer(),
            ),
            ("slot", TypeDescriptor::uint64()),
            ("target", checkpoint.clone()),
        ],
    );

    // The committee size comes from the spec dictionary at runtime, with
    // 64 as the declared fallback.
    let block = TypeDescriptor::container(
        TypeRef::new("types", "Block"),
        vec![
            ("slot", TypeDescriptor::uint64()),
            ("proposer_index", TypeDescriptor::uint64()),
            (
                "committee_bits",
                TypeDescriptor::bitvector_expr("COMMITTEE_SIZE", 64),
            ),
            (
                "attestations",
                TypeDescriptor::list_expr(attestation, "MAX_ATTESTATIONS", 128),
            ),
            ("graffiti", TypeDescriptor::string(32)),
        ],
    );

    let request = FileRequest {
        package: "types".to_string(),
        types: vec![TypeRequest::new(checkpoint), TypeRequest::new(block)],
    };

    let source = SszGenPipeline::new().with_legacy_shims().emit_file(&request)?;
    println!("{source}");
    Ok(())
}
