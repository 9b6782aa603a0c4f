//! Generates the v1beta1 KeyManagementService client and server stubs.
//!
//! Messages are declared by hand in `src/proto.rs`, so only the service
//! plumbing is generated here and no `protoc` is needed at build time.

use tonic_build::manual::{Builder, Method, Service};

fn method(name: &str, route: &str, input: &str, output: &str) -> Method {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(format!("crate::proto::{}", input))
        .output_type(format!("crate::proto::{}", output))
        .codec_path("tonic::codec::ProstCodec")
        .build()
}

fn main() {
    let service = Service::builder()
        .name("KeyManagementService")
        .package("v1beta1")
        .method(method("version", "Version", "VersionRequest", "VersionResponse"))
        .method(method("encrypt", "Encrypt", "EncryptRequest", "EncryptResponse"))
        .method(method("decrypt", "Decrypt", "DecryptRequest", "DecryptResponse"))
        .build();

    Builder::new().compile(&[service]);
    println!("cargo:rerun-if-changed=build.rs");
}
