use std::sync::Arc;

use axum::http::StatusCode;

use super::error::{AppError, Result};
use crate::cli::server::ServerCommand;
use crate::config::SearchOptions;
use crate::db::Database;
use crate::search::Searcher;

/// 应用状态
pub struct AppState {
    /// 数据库连接
    pub db: Database,
    /// 搜索编排器，启动时创建，所有请求共享
    pub searcher: Searcher,
    /// 默认搜索参数
    pub search: SearchOptions,
    /// 鉴权 token
    pub token: String,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(db: Database, searcher: Searcher, opts: ServerCommand) -> Arc<Self> {
        Arc::new(AppState { db, searcher, search: opts.search, token: opts.token })
    }

    pub fn check_token(&self, token: &str) -> Result<()> {
        if token != self.token {
            return Err(AppError::new(StatusCode::UNAUTHORIZED, "token 错误"));
        }
        Ok(())
    }
}
