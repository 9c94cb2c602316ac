use crate::parse::model::{ActivityCategory, ParsedActivity};
use regex::Regex;
use serde::Deserialize;

/// 模型原始输出的宽松形状；校验在 validate 里做
#[derive(Debug, Deserialize)]
struct RawActivity {
    category: Option<String>,
    #[serde(default)]
    subcategory: Option<String>,
    #[serde(default)]
    fuel_type: Option<String>,
    quantity: Option<f64>,
    unit: Option<String>,
    description: Option<String>,
    confidence: Option<f64>,
}

/// 去掉 markdown 代码围栏，截取首个 '{' 到末个 '}' 的 JSON 块
pub fn extract_json_block(text: &str) -> Option<String> {
    let re = Regex::new(r"```[a-zA-Z]*").unwrap();
    let stripped = re.replace_all(text, "");
    let s = stripped.as_ref();
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(s[start..=end].to_string())
}

fn none_if_unknown(v: Option<String>) -> Option<String> {
    v.and_then(|s| {
        let t = s.trim().to_string();
        if t.is_empty() || t.eq_ignore_ascii_case("unknown") || t.eq_ignore_ascii_case("null") {
            None
        } else {
            Some(t)
        }
    })
}

/// 活动抽取输出 → ParsedActivity；Err 携带拒绝原因（用于严格重试提示）
pub fn parse_activity_output(text: &str) -> Result<ParsedActivity, String> {
    let block = extract_json_block(text).ok_or_else(|| "no JSON object found".to_string())?;
    let raw: RawActivity =
        serde_json::from_str(&block).map_err(|e| format!("json deserialize failed: {e}"))?;

    let category: ActivityCategory = raw
        .category
        .as_deref()
        .ok_or_else(|| "missing category".to_string())?
        .parse()
        .map_err(|_| format!("category not in enum: {:?}", raw.category))?;

    let quantity = raw.quantity.ok_or_else(|| "missing quantity".to_string())?;
    if !quantity.is_finite() || quantity < 0.0 {
        return Err(format!("quantity not a non-negative number: {quantity}"));
    }

    let unit = raw
        .unit
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| "missing unit".to_string())?;

    let description = raw
        .description
        .map(|d| d.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|d| !d.is_empty())
        .ok_or_else(|| "missing description".to_string())?;

    let mut confidence = raw
        .confidence
        .ok_or_else(|| "missing confidence".to_string())?;
    if !confidence.is_finite() {
        return Err("confidence not a number".to_string());
    }
    confidence = confidence.clamp(0.0, 1.0);

    // 无数量时置信度必须体现出来，不允许看似合理的默认值
    if quantity == 0.0 && confidence >= 0.3 {
        confidence = 0.29;
    }

    Ok(ParsedActivity {
        category,
        subcategory: none_if_unknown(raw.subcategory),
        fuel_type: none_if_unknown(raw.fuel_type),
        quantity,
        unit,
        description,
        confidence,
    })
}
