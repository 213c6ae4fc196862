//! 写日志的告警通道

use async_trait::async_trait;
use tracing::warn;

use cronflow_domain::messaging::WarningData;
use cronflow_domain::ports::WarningSink;
use cronflow_errors::SchedResult;

/// 将告警写入结构化日志; 外部告警投递属于其他组件的职责
pub struct LogWarningSink;

#[async_trait]
impl WarningSink for LogWarningSink {
    async fn warning(&self, data: WarningData) -> SchedResult<()> {
        warn!(
            event = "warning",
            kind = ?data.kind,
            project_id = data.project_id,
            task_name = %data.task_name,
            "{}",
            data.message
        );
        Ok(())
    }
}
