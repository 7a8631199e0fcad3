//! Build script for compiling the PA/SPM/PB Protocol Buffer definitions.
//!
//! Mirrors the generated-stub split used elsewhere in the gRPC transport
//! layer this workspace borrows its wire conventions from: one `.proto`
//! per service, a shared `common.proto` for cross-service messages, server
//! and client code generated together so the PA can act as a gRPC client
//! of the SPM and PB while also serving its own front door.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/common.proto");
    println!("cargo:rerun-if-changed=proto/device_data.proto");
    println!("cargo:rerun-if-changed=proto/spm.proto");
    println!("cargo:rerun-if-changed=proto/pb.proto");
    println!("cargo:rerun-if-changed=proto/pa.proto");

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile(
            &[
                "proto/common.proto",
                "proto/device_data.proto",
                "proto/spm.proto",
                "proto/pb.proto",
                "proto/pa.proto",
            ],
            &["proto"],
        )?;

    Ok(())
}
