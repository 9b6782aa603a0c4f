//! Wire types for the v1beta1 `KeyManagementService`.
//!
//! Field tags follow the Kubernetes KMS provider contract, so any v1beta1
//! client (kube-apiserver included) can talk to this plugin unchanged.

#![allow(clippy::derive_partial_eq_without_eq)]

/// Protocol version carried in every request and echoed in `VersionResponse`.
pub const API_VERSION: &str = "v1beta1";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VersionRequest {
    /// Version of the KMS plugin API the caller speaks.
    #[prost(string, tag = "1")]
    pub version: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VersionResponse {
    /// Version of the KMS plugin API.
    #[prost(string, tag = "1")]
    pub version: ::prost::alloc::string::String,
    /// Name of the KMS provider.
    #[prost(string, tag = "2")]
    pub runtime_name: ::prost::alloc::string::String,
    /// Version of the KMS provider.
    #[prost(string, tag = "3")]
    pub runtime_version: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EncryptRequest {
    #[prost(string, tag = "1")]
    pub version: ::prost::alloc::string::String,
    /// Data to be encrypted.
    #[prost(bytes = "vec", tag = "2")]
    pub plain: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EncryptResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub cipher: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DecryptRequest {
    #[prost(string, tag = "1")]
    pub version: ::prost::alloc::string::String,
    /// Data to be decrypted.
    #[prost(bytes = "vec", tag = "2")]
    pub cipher: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DecryptResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub plain: ::prost::alloc::vec::Vec<u8>,
}

impl EncryptRequest {
    pub fn new(plain: impl Into<Vec<u8>>) -> Self {
        Self {
            version: API_VERSION.to_string(),
            plain: plain.into(),
        }
    }
}

impl DecryptRequest {
    pub fn new(cipher: impl Into<Vec<u8>>) -> Self {
        Self {
            version: API_VERSION.to_string(),
            cipher: cipher.into(),
        }
    }
}

include!(concat!(env!("OUT_DIR"), "/v1beta1.KeyManagementService.rs"));

pub use key_management_service_client::KeyManagementServiceClient;
pub use key_management_service_server::{KeyManagementService, KeyManagementServiceServer};
