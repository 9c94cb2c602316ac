use crate::llm::LlmError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 活动类别：封闭枚举，模型输出之外的值一律判为不合规
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityCategory {
    Fuel,
    Electricity,
    Transport,
    Heating,
    Waste,
    Water,
    Other,
}

impl FromStr for ActivityCategory {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fuel" => Ok(Self::Fuel),
            "electricity" => Ok(Self::Electricity),
            "transport" => Ok(Self::Transport),
            "heating" => Ok(Self::Heating),
            "waste" => Ok(Self::Waste),
            "water" => Ok(Self::Water),
            "other" => Ok(Self::Other),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ActivityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Fuel => "fuel",
            Self::Electricity => "electricity",
            Self::Transport => "transport",
            Self::Heating => "heating",
            Self::Waste => "waste",
            Self::Water => "water",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

/// 解析后的活动记录：仅随请求存在，持久化时作为快照嵌入计算记录
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParsedActivity {
    pub category: ActivityCategory,
    pub subcategory: Option<String>,
    pub fuel_type: Option<String>,
    /// 正实数；模型找不到数量时必须是 0，且 confidence < 0.3
    pub quantity: f64,
    pub unit: String,
    /// 用于嵌入检索的规范化描述
    pub description: String,
    pub confidence: f64,
}

#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// 模型输出两次都未通过 schema 校验
    #[error("malformed output: {0}")]
    MalformedOutput(String),
    #[error(transparent)]
    Llm(#[from] LlmError),
}
