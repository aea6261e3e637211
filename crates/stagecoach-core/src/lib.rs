//! stagecoach-core
//!
//! Path-addressed file / directory / notebook store backed by a remote
//! transfer endpoint, with a local staging cache for reads.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, model, listing, state）
//! - **ports**: 抽象化レイヤー（RemoteEndpoint, LocalStore, Clock）
//! - **app**: アプリケーションロジック（paths, stager, model_builder, store, builder）
//! - **impls**: 実装（InMemoryEndpoint, TokioLocalStore, TransferApiClient など）
//! - **config**: 環境変数からの設定
//! - **error**: ContentsError / StageError
//! - **observability**: ステージングのカウンタ

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;

pub use app::{ContentStore, StoreBuilder};
pub use config::{ContentsConfig, TransferApiConfig};
pub use error::{ContentsError, Result, StageError};
