//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **HttpTransport**: JSON-RPC over HTTP（本番用）
//! - **InMemoryServer**: プロセス内サーバー（テスト・デモ用）

pub mod http;
pub mod memory;

// 主要な型を再エクスポート
pub use self::http::HttpTransport;
pub use self::memory::InMemoryServer;
