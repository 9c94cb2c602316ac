/// 单位规整与换算。只认显式表里的换算对：
/// 表里查不到就报 UnitMismatch，绝不猜一个系数把错误数字算出来。

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum CalcError {
    #[error("unit mismatch: no conversion from '{from}' to '{to}'")]
    UnitMismatch { from: String, to: String },
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),
}

impl From<CalcError> for crate::matching::model::ReconcileError {
    fn from(e: CalcError) -> Self {
        match e {
            CalcError::UnitMismatch { from, to } => Self::UnitMismatch { from, to },
            CalcError::InvalidQuantity(msg) => Self::InvalidInput(msg),
        }
    }
}

/// 别名归一：大小写/拼写变体收敛到规范单位符号
pub fn normalize_unit(raw: &str) -> String {
    let u = raw.trim();
    match u.to_ascii_lowercase().as_str() {
        "l" | "liter" | "liters" | "litre" | "litres" => "L".to_string(),
        "ml" | "milliliter" | "milliliters" | "millilitre" | "millilitres" => "mL".to_string(),
        "gal" | "gallon" | "gallons" => "gal".to_string(),
        "kwh" => "kWh".to_string(),
        "mwh" => "MWh".to_string(),
        "gwh" => "GWh".to_string(),
        "kg" | "kgs" | "kilogram" | "kilograms" => "kg".to_string(),
        "g" | "gram" | "grams" => "g".to_string(),
        "t" | "ton" | "tons" | "tonne" | "tonnes" => "t".to_string(),
        "km" | "kilometer" | "kilometers" | "kilometre" | "kilometres" => "km".to_string(),
        "mi" | "mile" | "miles" => "mi".to_string(),
        "m3" | "m^3" | "m³" | "cubic meter" | "cubic meters" => "m3".to_string(),
        "kj" => "kJ".to_string(),
        "mj" => "MJ".to_string(),
        "gj" => "GJ".to_string(),
        _ => u.to_string(),
    }
}

/// 显式换算表：(源单位, 目标单位) → 乘数。只收同量纲、系数确定的换算。
const CONVERSIONS: &[(&str, &str, f64)] = &[
    ("mL", "L", 0.001),
    ("L", "mL", 1000.0),
    ("gal", "L", 3.785_411_784),
    ("L", "gal", 1.0 / 3.785_411_784),
    ("MWh", "kWh", 1000.0),
    ("kWh", "MWh", 0.001),
    ("GWh", "kWh", 1_000_000.0),
    ("kWh", "GWh", 0.000_001),
    ("g", "kg", 0.001),
    ("kg", "g", 1000.0),
    ("t", "kg", 1000.0),
    ("kg", "t", 0.001),
    ("mi", "km", 1.609_344),
    ("km", "mi", 1.0 / 1.609_344),
    ("MJ", "kJ", 1000.0),
    ("GJ", "MJ", 1000.0),
    ("GJ", "kJ", 1_000_000.0),
    ("kWh", "MJ", 3.6),
    ("MJ", "kWh", 1.0 / 3.6),
];

/// 把 quantity 从 from 换算到 to；单位相同原样返回
pub fn convert_quantity(quantity: f64, from: &str, to: &str) -> Result<f64, CalcError> {
    if !quantity.is_finite() || quantity < 0.0 {
        return Err(CalcError::InvalidQuantity(format!(
            "quantity must be finite and non-negative, got {quantity}"
        )));
    }
    let from_n = normalize_unit(from);
    let to_n = normalize_unit(to);
    if from_n == to_n {
        return Ok(quantity);
    }
    CONVERSIONS
        .iter()
        .find(|(f, t, _)| *f == from_n && *t == to_n)
        .map(|(_, _, k)| quantity * k)
        .ok_or(CalcError::UnitMismatch {
            from: from_n,
            to: to_n,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_normalize() {
        assert_eq!(normalize_unit("liters"), "L");
        assert_eq!(normalize_unit("KWH"), "kWh");
        assert_eq!(normalize_unit("tonnes"), "t");
        assert_eq!(normalize_unit(" km "), "km");
    }

    #[test]
    fn unknown_unit_passes_through_verbatim() {
        assert_eq!(normalize_unit("passenger-km"), "passenger-km");
    }

    #[test]
    fn same_unit_is_identity() {
        assert_eq!(convert_quantity(100.0, "L", "liters").unwrap(), 100.0);
    }

    #[test]
    fn mwh_to_kwh() {
        assert!((convert_quantity(1.5, "MWh", "kWh").unwrap() - 1500.0).abs() < 1e-9);
    }

    #[test]
    fn missing_pair_is_unit_mismatch() {
        let err = convert_quantity(10.0, "L", "kWh").unwrap_err();
        assert_eq!(
            err,
            CalcError::UnitMismatch {
                from: "L".to_string(),
                to: "kWh".to_string()
            }
        );
    }

    #[test]
    fn negative_quantity_rejected() {
        assert!(matches!(
            convert_quantity(-1.0, "L", "L"),
            Err(CalcError::InvalidQuantity(_))
        ));
    }
}
