use serde::{Deserialize, Serialize};

use crate::errors::QueueResult;

/// 任务配置的类型化封装
///
/// 队列本身把 payload 当作不透明的 JSON 存取；已知任务类型的生产方
/// 和执行器在边界处通过该枚举读写，未知扩展字段落入 `Opaque`。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskPayload {
    /// 文档分析：对一份已上传的文档执行多步分析流水线
    DocumentAnalysis {
        source_location: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        analysis_template: Option<String>,
        #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
        options: serde_json::Map<String, serde_json::Value>,
    },
    /// 未知任务类型的原始配置
    #[serde(untagged)]
    Opaque(serde_json::Value),
}

impl TaskPayload {
    pub fn from_value(value: serde_json::Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or(TaskPayload::Opaque(value))
    }

    pub fn to_value(&self) -> QueueResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_analysis_roundtrip() {
        let payload = TaskPayload::DocumentAnalysis {
            source_location: "s3://uploads/deck-42.pdf".to_string(),
            analysis_template: Some("standard".to_string()),
            options: serde_json::Map::new(),
        };

        let value = payload.to_value().unwrap();
        assert_eq!(value["kind"], "document_analysis");
        assert_eq!(TaskPayload::from_value(value), payload);
    }

    #[test]
    fn test_unknown_kind_falls_back_to_opaque() {
        let raw = json!({"kind": "ocr_sweep", "pages": [1, 2, 3]});
        match TaskPayload::from_value(raw.clone()) {
            TaskPayload::Opaque(value) => assert_eq!(value, raw),
            other => panic!("expected opaque payload, got {other:?}"),
        }
    }
}
