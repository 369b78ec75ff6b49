//! Chart tool definition, argument parsing, and ECharts option mapping.
//!
//! The mapping from validated arguments to a chart option is pure and total:
//! once the arguments pass schema validation there is no error path.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ChatError;
use crate::protocol::AssistantReply;

/// Name of the single capability advertised to the model.
pub const CHART_TOOL_NAME: &str = "generate_chart";

const CHART_COLORS: [&str; 8] = [
    "#5470c6", "#91cc75", "#fac858", "#ee6666", "#73c0de", "#3ba272", "#fc8452", "#9a60b4",
];

const DEFAULT_DESCRIPTION: &str = "图表已生成";

/// Category labels longer than this rotate 45° to avoid overlap.
const AXIS_LABEL_ROTATE_THRESHOLD: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Bar,
    Line,
    Pie,
    Scatter,
    Radar,
}

impl ChartType {
    fn as_str(self) -> &'static str {
        match self {
            ChartType::Bar => "bar",
            ChartType::Line => "line",
            ChartType::Pie => "pie",
            ChartType::Scatter => "scatter",
            ChartType::Radar => "radar",
        }
    }
}

/// One named data series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesData {
    pub name: String,
    #[serde(default)]
    pub data: Vec<f64>,
}

/// Arguments of a `generate_chart` invocation, parsed from the raw
/// argument string the model returns.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartArgs {
    pub chart_type: ChartType,
    pub title: String,
    #[serde(default)]
    pub x_axis_data: Option<Vec<String>>,
    pub series_data: Vec<SeriesData>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Renderer-agnostic chart configuration plus its human-readable description.
#[derive(Debug, Clone)]
pub struct ChartArtifact {
    pub option: Value,
    pub description: String,
}

/// The tool descriptor advertised on every tool-enabled completion call.
#[must_use]
pub fn chart_tool_descriptor() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": CHART_TOOL_NAME,
            "description": "根据用户需求生成 ECharts 图表配置。当用户要求绘制图表、生成可视化、画图表时调用此函数。",
            "parameters": {
                "type": "object",
                "properties": {
                    "chartType": {
                        "type": "string",
                        "enum": ["bar", "line", "pie", "scatter", "radar"],
                        "description": "图表类型：bar(柱状图)、line(折线图)、pie(饼图)、scatter(散点图)、radar(雷达图)"
                    },
                    "title": {
                        "type": "string",
                        "description": "图表标题"
                    },
                    "xAxisData": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "X轴数据（类目轴），如：['周一', '周二', '周三']"
                    },
                    "seriesData": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "name": { "type": "string", "description": "数据系列名称" },
                                "data": {
                                    "type": "array",
                                    "items": { "type": "number" },
                                    "description": "数据值数组"
                                }
                            }
                        },
                        "description": "数据系列数组，每个系列包含 name 和 data"
                    },
                    "description": {
                        "type": "string",
                        "description": "对图表的简要说明"
                    }
                },
                "required": ["chartType", "title", "seriesData"]
            }
        }
    })
}

/// Parse and validate the raw argument string of a tool invocation.
///
/// # Errors
///
/// Returns [`ChatError::ToolArguments`] on malformed JSON, an unknown chart
/// type, missing required fields, or an empty `seriesData`. Terminal for the
/// request, never retried.
pub fn parse_chart_args(raw: &str) -> Result<ChartArgs, ChatError> {
    let args: ChartArgs =
        serde_json::from_str(raw).map_err(|err| ChatError::ToolArguments(err.to_string()))?;
    if args.series_data.is_empty() {
        return Err(ChatError::ToolArguments(
            "seriesData must not be empty".to_string(),
        ));
    }
    Ok(args)
}

/// What the orchestrator should do with a tool-mode reply.
#[derive(Debug)]
pub enum ReplyAction {
    /// Emit one chart frame and close.
    Chart(ChartArtifact),
    /// Emit the accompanying text as a single frame and close.
    Text(String),
    /// Neither a chart nor text came back; re-issue as a plain stream so the
    /// route decision still yields visible output.
    Restream,
}

/// Map a tool-mode model reply to an action.
///
/// A recognized `generate_chart` invocation wins over any accompanying text.
/// An unrecognized tool name is treated as unsupported and falls back to the
/// text path.
///
/// # Errors
///
/// Returns [`ChatError::ToolArguments`] when the recognized invocation
/// carries unparseable or schema-invalid arguments.
pub fn interpret_reply(reply: AssistantReply) -> Result<ReplyAction, ChatError> {
    if let Some(call) = reply.tool_call {
        if call.name == CHART_TOOL_NAME {
            let args = parse_chart_args(&call.arguments)?;
            return Ok(ReplyAction::Chart(build_chart_artifact(&args)));
        }
        tracing::warn!(tool = %call.name, "model invoked an unsupported tool, falling back");
    }

    match reply.content {
        Some(content) if !content.is_empty() => Ok(ReplyAction::Text(content)),
        _ => Ok(ReplyAction::Restream),
    }
}

/// Build the ECharts option for validated arguments. Pure: identical input
/// yields structurally identical output.
#[must_use]
pub fn build_chart_artifact(args: &ChartArgs) -> ChartArtifact {
    let tooltip_trigger = if args.chart_type == ChartType::Pie {
        "item"
    } else {
        "axis"
    };
    let mut option = json!({
        "title": {
            "text": args.title,
            "left": "center",
            "textStyle": { "fontSize": 16, "fontWeight": "bold" }
        },
        "tooltip": { "trigger": tooltip_trigger },
        "color": CHART_COLORS,
    });

    match args.chart_type {
        ChartType::Pie => fill_pie(&mut option, args),
        ChartType::Radar => fill_radar(&mut option, args),
        ChartType::Bar | ChartType::Line | ChartType::Scatter => fill_cartesian(&mut option, args),
    }

    ChartArtifact {
        option,
        description: args
            .description
            .clone()
            .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
    }
}

fn ordinal_labels(prefix: &str, count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("{prefix}{i}")).collect()
}

fn fill_pie(option: &mut Value, args: &ChartArgs) {
    let series = &args.series_data[0];
    let data: Vec<Value> = match &args.x_axis_data {
        // Zip labels with the first series' values; a missing value fills as 0
        Some(labels) => labels
            .iter()
            .enumerate()
            .map(|(i, name)| {
                json!({ "name": name, "value": series.data.get(i).copied().unwrap_or(0.0) })
            })
            .collect(),
        None => series
            .data
            .iter()
            .enumerate()
            .map(|(i, value)| json!({ "name": format!("项目{}", i + 1), "value": value }))
            .collect(),
    };

    let name = if series.name.is_empty() {
        &args.title
    } else {
        &series.name
    };
    option["series"] = json!([{
        "name": name,
        "type": "pie",
        "radius": ["40%", "70%"],
        "avoidLabelOverlap": false,
        "itemStyle": {
            "borderRadius": 10,
            "borderColor": "#fff",
            "borderWidth": 2
        },
        "label": {
            "show": true,
            "formatter": "{b}: {d}%"
        },
        "data": data,
    }]);
}

fn fill_radar(option: &mut Value, args: &ChartArgs) {
    // Scale against the maximum over all series so every series stays
    // inside the indicator bounds.
    let max_scale = args
        .series_data
        .iter()
        .flat_map(|series| series.data.iter().copied())
        .fold(None::<f64>, |acc, value| {
            Some(acc.map_or(value, |m| m.max(value)))
        })
        .map_or(0.0, |max| max * 1.2);

    let indicator_names = match &args.x_axis_data {
        Some(labels) => labels.clone(),
        None => ordinal_labels("指标", args.series_data[0].data.len()),
    };
    let indicator: Vec<Value> = indicator_names
        .iter()
        .map(|name| json!({ "name": name, "max": max_scale }))
        .collect();

    option["radar"] = json!({ "indicator": indicator });
    option["series"] = json!([{
        "type": "radar",
        "data": args
            .series_data
            .iter()
            .map(|series| json!({ "name": series.name, "value": series.data }))
            .collect::<Vec<_>>(),
    }]);
}

fn fill_cartesian(option: &mut Value, args: &ChartArgs) {
    let labels = match &args.x_axis_data {
        Some(labels) => labels.clone(),
        None => ordinal_labels("项目", args.series_data[0].data.len()),
    };
    // Rotation only applies to caller-provided labels; synthesized ordinals
    // stay horizontal.
    let rotate = match &args.x_axis_data {
        Some(labels) if labels.len() > AXIS_LABEL_ROTATE_THRESHOLD => 45,
        _ => 0,
    };

    option["xAxis"] = json!({
        "type": "category",
        "data": labels,
        "axisLabel": { "rotate": rotate },
    });
    option["yAxis"] = json!({ "type": "value" });
    option["legend"] = json!({
        "data": args.series_data.iter().map(|s| s.name.clone()).collect::<Vec<_>>(),
        "bottom": 0,
    });
    option["grid"] = json!({
        "left": "3%",
        "right": "4%",
        "bottom": "15%",
        "containLabel": true,
    });
    option["series"] = Value::Array(
        args.series_data
            .iter()
            .map(|series| {
                json!({
                    "name": series.name,
                    "type": args.chart_type.as_str(),
                    "data": series.data,
                    "smooth": args.chart_type == ChartType::Line,
                    "emphasis": { "focus": "series" },
                })
            })
            .collect(),
    );
}
