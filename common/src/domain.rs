//! 建設ドメイン知識（単位・材料カテゴリ）

/// 単位の正規形と表記ゆれ
const UNIT_FORMS: &[(&str, &[&str])] = &[
    ("m", &["m", "lm", "rm", "lin m", "linear m", "meter", "meters", "metre", "metres", "linear", "length"]),
    ("m2", &["m2", "m²", "sqm", "sq m", "sq.m", "sq.m.", "square metre", "square metres", "square meter", "square", "area"]),
    ("m3", &["m3", "m³", "cum", "cu m", "cu.m", "cubic metre", "cubic metres", "cubic meter", "cubic", "volume"]),
    ("kg", &["kg", "kgs", "kilo", "kilogram", "kilograms"]),
    ("t", &["t", "ton", "tons", "tonne", "tonnes"]),
    ("nr", &["nr", "no", "no.", "nos", "number", "each", "ea", "item", "pcs", "piece", "pieces"]),
    ("ls", &["ls", "l.s.", "sum", "lump sum", "prov sum"]),
    ("l", &["l", "ltr", "litre", "litres", "liter", "liters"]),
    ("hr", &["hr", "hrs", "hour", "hours"]),
    ("day", &["day", "days"]),
    ("week", &["wk", "week", "weeks"]),
    ("month", &["mth", "month", "months"]),
];

/// 相互に換算可能な単位群
const UNIT_FAMILIES: &[&[&str]] = &[
    &["kg", "t"],
    &["hr", "day", "week", "month"],
    &["nr", "ls"],
];

/// 単位を正規形に変換
pub fn normalize_unit(unit: &str) -> Option<&'static str> {
    let lowered = unit.trim().to_lowercase();
    if lowered.is_empty() {
        return None;
    }
    UNIT_FORMS
        .iter()
        .find(|(_, forms)| forms.contains(&lowered.as_str()))
        .map(|(canonical, _)| *canonical)
}

/// 単位同士の関係
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitRelation {
    Exact,
    Compatible,
    Incompatible,
    /// どちらかが未指定
    Unknown,
}

/// 2つの単位の関係を判定
pub fn unit_relation(a: Option<&str>, b: Option<&str>) -> UnitRelation {
    let (Some(a), Some(b)) = (a, b) else {
        return UnitRelation::Unknown;
    };
    let (raw_a, raw_b) = (a.trim().to_lowercase(), b.trim().to_lowercase());
    if raw_a.is_empty() || raw_b.is_empty() {
        return UnitRelation::Unknown;
    }
    if raw_a == raw_b {
        return UnitRelation::Exact;
    }

    match (normalize_unit(&raw_a), normalize_unit(&raw_b)) {
        (Some(x), Some(y)) if x == y => UnitRelation::Exact,
        (Some(x), Some(y)) => {
            let same_family = UNIT_FAMILIES
                .iter()
                .any(|family| family.contains(&x) && family.contains(&y));
            if same_family {
                UnitRelation::Compatible
            } else {
                UnitRelation::Incompatible
            }
        }
        _ => UnitRelation::Incompatible,
    }
}

/// 材料カテゴリと判定語
pub const MATERIAL_CATEGORIES: &[(&str, &[&str])] = &[
    ("concrete", &["concrete", "cement", "rc", "reinforced", "cast", "insitu", "screed"]),
    ("steel", &["steel", "rebar", "reinforcement", "ms", "mild", "iron", "metal"]),
    ("excavation", &["excavation", "excavate", "dig", "earth", "soil", "ground", "foundation"]),
    ("masonry", &["brick", "block", "masonry", "wall", "partition"]),
    ("waterproof", &["waterproof", "damp", "moisture", "seal", "membrane"]),
    ("formwork", &["formwork", "shuttering", "mould", "framework"]),
    ("drainage", &["drain", "pipe", "sewer", "manhole", "gully", "plumbing"]),
    ("finishing", &["paint", "plaster", "render", "finish", "coating"]),
];

/// テキスト中に現れる材料カテゴリを返す
///
/// 3文字以下の判定語は完全一致、それ以外は前方一致で判定する。
pub fn materials_in(text: &str) -> Vec<&'static str> {
    let lowered = text.to_lowercase();
    let tokens: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    MATERIAL_CATEGORIES
        .iter()
        .filter(|(_, terms)| {
            terms.iter().any(|term| {
                tokens.iter().any(|token| {
                    if term.len() <= 3 {
                        token == term
                    } else {
                        token.starts_with(term)
                    }
                })
            })
        })
        .map(|(name, _)| *name)
        .collect()
}

/// 単位表記かどうか
pub fn is_unit_token(token: &str) -> bool {
    normalize_unit(token).is_some()
}
