pub mod dispatch;

/// Trigger terms that route a request into tool-calling mode.
///
/// This is a heuristic, not a classifier: a miss falls through to the plain
/// streamed completion, and a false positive degrades gracefully when the
/// model declines to call the tool. English entries must be lowercase, they
/// are matched against a lowercased message.
const CHART_TRIGGERS: &[&str] = &[
    "图表",
    "绘制",
    "画一个",
    "生成图",
    "柱状图",
    "折线图",
    "饼图",
    "散点图",
    "雷达图",
    "可视化",
    "图形",
    "chart",
    "plot",
];

/// Decide whether the latest user message asks for a generated chart.
///
/// Case-insensitive substring test against the fixed trigger set. Pure,
/// never fails.
#[must_use]
pub fn needs_chart_mode(message: &str) -> bool {
    let lower = message.to_lowercase();
    CHART_TRIGGERS.iter().any(|term| lower.contains(term))
}
