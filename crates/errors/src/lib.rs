use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedError {
    #[error("无权编辑该workflow")]
    Unauthorized,
    #[error("{resource} 不存在")]
    NotFound { resource: String },
    #[error("协调存储事务冲突: {0}")]
    Conflict(String),
    #[error("无效的任务依赖图, 节点: {node}")]
    InvalidDag { node: String },
    #[error("workflow任务失败")]
    WorkflowFailed,
    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("存储服务暂时不可用: {0}")]
    TransientBackend(String),
    #[error("内部错误: {0}")]
    Fatal(String),
}

pub type SchedResult<T> = Result<T, SchedError>;

impl SchedError {
    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }
    pub fn conflict<S: Into<String>>(msg: S) -> Self {
        Self::Conflict(msg.into())
    }
    pub fn invalid_dag<S: Into<String>>(node: S) -> Self {
        Self::InvalidDag { node: node.into() }
    }
    pub fn transient<S: Into<String>>(msg: S) -> Self {
        Self::TransientBackend(msg.into())
    }
    pub fn fatal<S: Into<String>>(msg: S) -> Self {
        Self::Fatal(msg.into())
    }

    /// 对外暴露的错误码, HTTP状态码或内部错误码
    pub fn code(&self) -> u16 {
        match self {
            SchedError::Unauthorized => 401,
            SchedError::NotFound { .. } => 404,
            SchedError::Conflict(_) => 409,
            SchedError::InvalidDag { .. } => 400,
            SchedError::InvalidCron { .. } => 400,
            SchedError::WorkflowFailed => 500,
            SchedError::Serialization(_) => 500,
            SchedError::TransientBackend(_) => 503,
            SchedError::Fatal(_) => 500,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SchedError::Conflict(_) | SchedError::TransientBackend(_)
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, SchedError::Fatal(_))
    }

    pub fn user_message(&self) -> &str {
        match self {
            SchedError::Unauthorized => "无权编辑该workflow",
            SchedError::NotFound { .. } => "请求的资源不存在",
            SchedError::Conflict(_) => "操作冲突, 请稍后重试",
            SchedError::InvalidDag { .. } => "workflow任务依赖存在环",
            SchedError::InvalidCron { .. } => "CRON表达式配置有误",
            SchedError::WorkflowFailed => "workflow任务失败",
            _ => "系统繁忙, 请稍后重试",
        }
    }
}

impl From<serde_json::Error> for SchedError {
    fn from(err: serde_json::Error) -> Self {
        SchedError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for SchedError {
    fn from(err: anyhow::Error) -> Self {
        SchedError::Fatal(err.to_string())
    }
}

#[cfg(test)]
mod tests;
