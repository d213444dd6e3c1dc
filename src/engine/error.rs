// ==========================================
// 排放核算引擎 - 引擎层错误类型
// ==========================================
// 职责: 定义引擎层错误类型，转换 Repository 错误为可分类的业务错误
// 红线: 所有错误信息必须包含显式原因（可解释性）
// ==========================================

use crate::domain::types::TargetKind;
use crate::repository::error::RepositoryError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 引擎层错误类型
#[derive(Error, Debug)]
pub enum EngineError {
    // ==========================================
    // 用户可修正错误
    // ==========================================
    #[error("数据校验失败: field={field}, {message}")]
    Validation { field: String, message: String },

    #[error("未找到可用排放因子: entry_type={entry_type}, emission_type={emission_type}, classification={classification}")]
    FactorNotFound {
        entry_type: String,
        emission_type: String,
        classification: String,
    },

    /// 因子存在但缺少策略所需系数（因子配置问题）
    #[error("因子系数不可用: factor_id={factor_id}, field={field}, {message}")]
    InvalidFactorValues {
        factor_id: String,
        field: String,
        message: String,
    },

    #[error("记录未找到: {entity}(id={id})")]
    NotFound { entity: String, id: String },

    // ==========================================
    // 配置缺陷
    // ==========================================
    #[error("未注册计算策略: entry_type={entry_type}")]
    StrategyNotRegistered { entry_type: String },

    #[error("计算策略重复注册: entry_type={entry_type}")]
    DuplicateStrategy { entry_type: String },

    // ==========================================
    // 账本完整性 / 并发控制
    // ==========================================
    #[error("账本完整性校验失败: {target_kind}:{target_id}, 断链版本={broken_version}")]
    LedgerIntegrity {
        target_kind: TargetKind,
        target_id: String,
        broken_version: i64,
    },

    #[error("并发修改冲突: {target_kind}:{target_id}, expected_version={expected:?}, actual_version={actual:?}")]
    ConcurrentModification {
        target_kind: TargetKind,
        target_id: String,
        expected: Option<i64>,
        actual: Option<i64>,
    },

    // ==========================================
    // 存储 / 内部错误
    // ==========================================
    #[error("存储错误: {0}")]
    Storage(RepositoryError),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误严重程度
///
/// 调用方据此决定提示用户、重试或告警
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    UserActionable,      // 用户修正输入后可重试
    Retryable,           // 并发冲突，重读后重试
    ConfigurationDefect, // 部署配置缺陷
    AdministrativeAlert, // 需管理员介入（账本篡改）
    Fatal,               // 存储层故障
}

impl EngineError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        EngineError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn not_found(entity: &str, id: &str) -> Self {
        EngineError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    /// 是否为存储层故障（批量重算遇到即中止）
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            EngineError::Storage(
                RepositoryError::LockError(_)
                    | RepositoryError::DatabaseTransactionError(_)
                    | RepositoryError::DatabaseQueryError(_)
                    | RepositoryError::InternalError(_)
            )
        )
    }

    /// 是否可由用户修正输入解决
    pub fn is_user_actionable(&self) -> bool {
        self.severity() == ErrorSeverity::UserActionable
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            EngineError::Validation { .. }
            | EngineError::FactorNotFound { .. }
            | EngineError::InvalidFactorValues { .. }
            | EngineError::NotFound { .. } => ErrorSeverity::UserActionable,
            EngineError::ConcurrentModification { .. }
            | EngineError::Storage(RepositoryError::VersionConflict { .. }) => ErrorSeverity::Retryable,
            EngineError::StrategyNotRegistered { .. } | EngineError::DuplicateStrategy { .. } => {
                ErrorSeverity::ConfigurationDefect
            }
            EngineError::LedgerIntegrity { .. } => ErrorSeverity::AdministrativeAlert,
            EngineError::Storage(RepositoryError::ForeignKeyViolation(_))
            | EngineError::Storage(RepositoryError::UniqueConstraintViolation(_)) => {
                ErrorSeverity::UserActionable
            }
            EngineError::Storage(_) | EngineError::Internal(_) => ErrorSeverity::Fatal,
        }
    }
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for EngineError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => EngineError::NotFound { entity, id },
            other => EngineError::Storage(other),
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        EngineError::from(RepositoryError::from(err))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Storage(RepositoryError::from(err))
    }
}

/// Result 类型别名
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_conflict_is_retryable_not_storage_failure() {
        let err = EngineError::from(RepositoryError::VersionConflict {
            message: "factor:f1 version=2".to_string(),
        });
        assert_eq!(err.severity(), ErrorSeverity::Retryable);
        assert!(!err.is_storage_failure());

        let race = EngineError::ConcurrentModification {
            target_kind: TargetKind::Factor,
            target_id: "f1".to_string(),
            expected: Some(1),
            actual: Some(2),
        };
        assert_eq!(race.severity(), ErrorSeverity::Retryable);
        assert!(race.to_string().contains("expected_version=Some(1)"));
    }

    #[test]
    fn test_storage_failure_classification() {
        let lock = EngineError::from(RepositoryError::LockError("poisoned".to_string()));
        assert!(lock.is_storage_failure());
        assert_eq!(lock.severity(), ErrorSeverity::Fatal);

        let fk = EngineError::from(RepositoryError::ForeignKeyViolation("FOREIGN KEY".to_string()));
        assert!(!fk.is_storage_failure());
        assert!(fk.is_user_actionable());
    }

    #[test]
    fn test_severity_per_variant() {
        assert!(EngineError::validation("hours", "out of range").is_user_actionable());
        assert_eq!(
            EngineError::StrategyNotRegistered { entry_type: "x".to_string() }.severity(),
            ErrorSeverity::ConfigurationDefect
        );
        let tampered = EngineError::LedgerIntegrity {
            target_kind: TargetKind::Factor,
            target_id: "f1".to_string(),
            broken_version: 2,
        };
        assert_eq!(tampered.severity(), ErrorSeverity::AdministrativeAlert);
        assert!(tampered.to_string().contains("断链版本=2"));
    }
}
