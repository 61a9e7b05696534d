//! Build script for proto compilation.
//!
//! Two protocols are compiled into `OUT_DIR`:
//!
//! - `proto/provider.proto`: the host-facing provider protocol. Only the
//!   server side is generated.
//! - `proto/apiservice.proto`: the PipeCD control-plane API. Only the client
//!   side is generated.
//!
//! Both require `protoc` to be available on the build machine.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_prost_build::configure()
        .build_client(false)
        .build_server(true)
        .compile_protos(&["proto/provider.proto"], &["proto"])?;

    tonic_prost_build::configure()
        .build_client(true)
        .build_server(false)
        .compile_protos(&["proto/apiservice.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto/provider.proto");
    println!("cargo:rerun-if-changed=proto/apiservice.proto");

    Ok(())
}
