use std::env;
use std::path::PathBuf;

/// Build script for generating the gRPC code and file descriptor set for the sandbox service.
///
/// Compiles `src/proto/sandbox.proto` with `tonic_build`, writing the generated Rust code and a
/// binary file descriptor set (`sandbox_descriptor.bin`) to `OUT_DIR`. The descriptor set backs
/// the reflection service registered next to the executor.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = PathBuf::from(env::var("OUT_DIR")?);

    tonic_build::configure()
        .file_descriptor_set_path(out_dir.join("sandbox_descriptor.bin"))
        .compile(&["src/proto/sandbox.proto"], &["src/proto"])?;

    println!("cargo:rerun-if-changed=src/proto/sandbox.proto");
    println!("cargo:rerun-if-changed=src/proto");

    Ok(())
}
