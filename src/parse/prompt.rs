use crate::parse::model::ParsedActivity;

pub struct PromptBuilder;

impl PromptBuilder {
    /// 活动抽取：固定 JSON schema 指令，类别为封闭枚举
    pub fn build_activity_extraction(raw_input: &str) -> String {
        let mut lines = Vec::new();
        lines.push("Extract a structured emission activity from the input below.".to_string());
        lines.push("Return ONLY a single JSON object, no markdown, no explanations.".to_string());
        lines.push("Schema:".to_string());
        lines.push("{".to_string());
        lines.push("  \"category\": one of \"fuel\"|\"electricity\"|\"transport\"|\"heating\"|\"waste\"|\"water\"|\"other\",".to_string());
        lines.push("  \"subcategory\": string or null,".to_string());
        lines.push("  \"fuel_type\": string or null,".to_string());
        lines.push("  \"quantity\": number (the numeric amount found in the input),".to_string());
        lines.push("  \"unit\": short unit token, e.g. \"L\", \"kWh\", \"km\", \"kg\",".to_string());
        lines.push("  \"description\": short canonical English description of the activity,".to_string());
        lines.push("  \"confidence\": number between 0 and 1".to_string());
        lines.push("}".to_string());
        lines.push("".to_string());
        lines.push("If no numeric quantity can be found, set quantity to 0 and confidence below 0.3.".to_string());
        lines.push("Never invent a quantity that is not present in the input.".to_string());
        lines.push("".to_string());
        lines.push(format!("Input: {raw_input}"));
        lines.join("\n")
    }

    /// 重试版：一次失败后加严格提醒再试一次
    pub fn build_activity_extraction_strict(raw_input: &str, reject_reason: &str) -> String {
        let mut lines = Vec::new();
        lines.push(
            "Your previous answer was rejected by the schema validator.".to_string(),
        );
        lines.push(format!("Rejection reason: {reject_reason}"));
        lines.push(
            "Answer again with EXACTLY one JSON object and nothing else: no code fences,"
                .to_string(),
        );
        lines.push("no prose, no trailing commentary. All seven fields are mandatory.".to_string());
        lines.push("".to_string());
        lines.push(Self::build_activity_extraction(raw_input));
        lines.join("\n")
    }

    /// 推理匹配：不访问目录，直接凭训练知识给出权威因子与出处
    pub fn build_reasoning_match(parsed: &ParsedActivity) -> String {
        let mut lines = Vec::new();
        lines.push(
            "You are a carbon accounting expert. Name the authoritative emission factor"
                .to_string(),
        );
        lines.push(
            "for the activity below, using standard sources (DEFRA, EPA, IPCC).".to_string(),
        );
        lines.push("Return ONLY a single JSON object:".to_string());
        lines.push("{".to_string());
        lines.push("  \"factor_value\": number (kg CO2e per activity unit),".to_string());
        lines.push("  \"unit\": activity unit the factor applies to, e.g. \"L\", \"kWh\",".to_string());
        lines.push("  \"ghg_unit\": emission unit, normally \"kg CO2e\",".to_string());
        lines.push("  \"source\": citation string, e.g. \"DEFRA 2024\" (MANDATORY),".to_string());
        lines.push("  \"scope\": 1, 2, 3 or null,".to_string());
        lines.push("  \"confidence\": number between 0 and 1".to_string());
        lines.push("}".to_string());
        lines.push("".to_string());
        lines.push("An uncited answer is unusable: if you cannot cite a source, return".to_string());
        lines.push("{\"source\": \"\"} and nothing else will be read.".to_string());
        lines.push("".to_string());
        lines.push(format!(
            "Activity: category={}, subcategory={}, fuel_type={}, quantity={}, unit={}, description={}",
            parsed.category,
            parsed.subcategory.as_deref().unwrap_or("n/a"),
            parsed.fuel_type.as_deref().unwrap_or("n/a"),
            parsed.quantity,
            parsed.unit,
            parsed.description
        ));
        lines.join("\n")
    }

    /// 文档抽取：从已提取的文档文本里拿多条活动条目（schema 来自数据识别流程）
    pub fn build_document_extraction(document_text: &str) -> String {
        let mut lines = Vec::new();
        lines.push(
            "Extract ALL carbon emission / energy usage entries from the document text below."
                .to_string(),
        );
        lines.push("Return ONLY a JSON object: {\"entries\": [ ... ]}.".to_string());
        lines.push("Each entry:".to_string());
        lines.push("{".to_string());
        lines.push("  \"date\": ISO date or \"unknown\",".to_string());
        lines.push("  \"type\": activity type (electricity, gas, fuel, ...) or \"unknown\",".to_string());
        lines.push("  \"region\": string or \"unknown\",".to_string());
        lines.push("  \"amount\": number or 0,".to_string());
        lines.push("  \"amount_unit\": unit token or \"unknown\",".to_string());
        lines.push("  \"year\": number or null,".to_string());
        lines.push("  \"supplier\": string or \"unknown\",".to_string());
        lines.push("  \"energy_source\": string or \"unknown\",".to_string());
        lines.push("  \"invoice_id\": string or \"unknown\",".to_string());
        lines.push("  \"description\": string".to_string());
        lines.push("}".to_string());
        lines.push("Use \"unknown\" for missing fields, never invent values.".to_string());
        lines.push("".to_string());
        lines.push("Document text:".to_string());
        lines.push(document_text.to_string());
        lines.join("\n")
    }
}
