//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **StoreBuilder**: ContentStore の構築とワイヤリング
//! - **ContentStore**: ホスト向けの get / save / delete / rename / copy
//! - **CacheStager**: リモート→ローカルのステージングと single-flight
//! - **ContentModelBuilder**: リスティングとステージ済みファイルからモデルを構築
//! - **PathTranslator**: 論理パスの解決

pub mod builder;
pub mod model_builder;
pub mod paths;
pub mod stager;
pub mod store;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, StoreBuilder};
pub use self::model_builder::ContentModelBuilder;
pub use self::paths::{PathTranslator, ResolvedPath};
pub use self::stager::{CacheStager, StageOutcome, StageReport, StagerSettings};
pub use self::store::ContentStore;
