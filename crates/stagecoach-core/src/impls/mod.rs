//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryEndpoint**: 開発用・テスト用の転送サービス
//! - **InMemoryLocalStore**: テスト用のローカルキャッシュ
//! - **TokioLocalStore**: 本番用のローカルキャッシュ（tokio::fs）
//! - **TransferApiClient**: 本番用の転送サービス（REST）

pub mod memory_endpoint;
pub mod memory_store;
pub mod tokio_store;
pub mod transfer_api;

pub use self::memory_endpoint::{EndpointStats, InMemoryEndpoint, JobBehavior};
pub use self::memory_store::InMemoryLocalStore;
pub use self::tokio_store::TokioLocalStore;
pub use self::transfer_api::TransferApiClient;
