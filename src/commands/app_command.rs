use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
pub enum AppCommand {
    Calculate {
        company_id: String,
        text: String,
    },
    /// 批量计算：文件是 CalculateRequest 的 JSON 数组
    Batch {
        company_id: String,
        path: String,
    },
    /// 从文档文本抽取台账条目
    Extract {
        path: String,
    },
    /// 从 JSON 文件摄取因子目录
    Ingest {
        path: String,
    },
    /// 给未嵌入/旧模型嵌入的因子补向量
    EmbedBackfill,
    Records {
        company_id: String,
        limit: u64,
    },
    Stats,
    Help,
    Unknown(String),
}

impl FromStr for AppCommand {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        if parts.is_empty() {
            return Ok(AppCommand::Help);
        }

        match parts[0] {
            "calculate" | "calc" => {
                if let Some(company_id) = parts.get(1) {
                    let text = parts[2..].join(" ");
                    if !text.is_empty() {
                        return Ok(AppCommand::Calculate {
                            company_id: company_id.to_string(),
                            text,
                        });
                    }
                }
                Ok(AppCommand::Unknown(
                    "用法: calculate <company_id> <活动描述...>".to_string(),
                ))
            }
            "batch" => {
                if let (Some(company_id), Some(path)) = (parts.get(1), parts.get(2)) {
                    Ok(AppCommand::Batch {
                        company_id: company_id.to_string(),
                        path: path.to_string(),
                    })
                } else {
                    Ok(AppCommand::Unknown(
                        "用法: batch <company_id> <requests.json>".to_string(),
                    ))
                }
            }
            "extract" => {
                if let Some(path) = parts.get(1) {
                    Ok(AppCommand::Extract {
                        path: path.to_string(),
                    })
                } else {
                    Ok(AppCommand::Unknown("用法: extract <document.txt>".to_string()))
                }
            }
            "ingest" => {
                if let Some(path) = parts.get(1) {
                    Ok(AppCommand::Ingest {
                        path: path.to_string(),
                    })
                } else {
                    Ok(AppCommand::Unknown("用法: ingest <factors.json>".to_string()))
                }
            }
            "embed" => {
                if parts.get(1) == Some(&"backfill") {
                    Ok(AppCommand::EmbedBackfill)
                } else {
                    Ok(AppCommand::Unknown("用法: embed backfill".to_string()))
                }
            }
            "records" => {
                if let Some(company_id) = parts.get(1) {
                    let limit = parts
                        .get(2)
                        .and_then(|s| s.parse::<u64>().ok())
                        .unwrap_or(20);
                    Ok(AppCommand::Records {
                        company_id: company_id.to_string(),
                        limit,
                    })
                } else {
                    Ok(AppCommand::Unknown(
                        "用法: records <company_id> [limit]".to_string(),
                    ))
                }
            }
            "stats" => Ok(AppCommand::Stats),
            "help" | "h" => Ok(AppCommand::Help),
            _ => Ok(AppCommand::Unknown(format!("未知命令: {}", parts[0]))),
        }
    }
}

pub const USAGE: &str = "\
carbonmatch <命令>

  calculate <company_id> <活动描述...>   解析、匹配并计算一条活动记录
  batch <company_id> <requests.json>     批量计算（文件为请求 JSON 数组）
  extract <document.txt>                 从文档文本抽取台账条目
  ingest <factors.json>                  摄取排放因子目录
  embed backfill                         给目录补嵌入向量
  records <company_id> [limit]           查某公司最近的计算记录
  stats                                  目录与计算记录统计
  help                                   本帮助";
