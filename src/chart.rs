use crate::data::Table;
use crate::error::{DashboardError, Result};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Bar,
    Line,
    Scatter,
    ScatterGeo,
    Choropleth,
    Treemap,
    Sunburst,
    Radar,
    Box,
}

/// Visual channels a single field can be mapped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    X,
    Y,
    Color,
    Size,
    HoverName,
    AnimationFrame,
    AnimationGroup,
    Values,
    Lat,
    Lon,
    Locations,
    R,
    Theta,
}

impl ChartKind {
    fn required_channels(self) -> &'static [Channel] {
        match self {
            ChartKind::Bar | ChartKind::Line | ChartKind::Scatter | ChartKind::Box => &[Channel::X, Channel::Y],
            ChartKind::ScatterGeo => &[Channel::Lat, Channel::Lon],
            ChartKind::Choropleth => &[Channel::Locations, Channel::Color],
            ChartKind::Treemap | ChartKind::Sunburst => &[Channel::Values],
            ChartKind::Radar => &[Channel::R, Channel::Theta],
        }
    }

    fn is_hierarchical(self) -> bool {
        matches!(self, ChartKind::Treemap | ChartKind::Sunburst)
    }
}

/// Field-to-channel mapping of a chart.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Encoding {
    pub channels: BTreeMap<Channel, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hover_data: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<String>,
}

impl Encoding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, channel: Channel, field: &str) -> Self {
        self.channels.insert(channel, field.to_string());
        self
    }

    pub fn hover(mut self, field: &str) -> Self {
        self.hover_data.push(field.to_string());
        self
    }

    pub fn path(mut self, fields: &[&str]) -> Self {
        self.path = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn get(&self, channel: Channel) -> Option<&str> {
        self.channels.get(&channel).map(String::as_str)
    }

    /// Every field the encoding references.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.channels
            .values()
            .chain(self.hover_data.iter())
            .chain(self.path.iter())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BarMode {
    Group,
    Stack,
}

/// Presentation hints for the rendering collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChartOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_scale: Option<String>,
    /// Continuous scale given as evenly spaced hex stops.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub color_scale_stops: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub color_sequence: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bar_mode: Option<BarMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_max: Option<f64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub markers: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub box_points: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_info: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSpec {
    pub kind: ChartKind,
    pub title: Option<String>,
    pub encoding: Encoding,
    /// Display labels keyed by field name.
    pub labels: BTreeMap<String, String>,
    pub options: ChartOptions,
    pub data: Table,
}

impl ChartSpec {
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_label(mut self, field: &str, label: &str) -> Self {
        self.labels.insert(field.to_string(), label.to_string());
        self
    }

    pub fn with_options(mut self, options: ChartOptions) -> Self {
        self.options = options;
        self
    }

    /// Label for a field, falling back to the field name.
    pub fn label_for<'a>(&'a self, field: &'a str) -> &'a str {
        self.labels.get(field).map(String::as_str).unwrap_or(field)
    }
}

/// Assemble a chart spec, checking that every encoded field is a column of
/// `table` and that the chart kind's required channels are mapped.
pub fn build(table: Table, kind: ChartKind, encoding: Encoding) -> Result<ChartSpec> {
    for channel in kind.required_channels() {
        if encoding.get(*channel).is_none() {
            return Err(DashboardError::Encoding(format!(
                "{:?} chart requires the {:?} channel",
                kind, channel
            )));
        }
    }

    if kind.is_hierarchical() && encoding.path.is_empty() {
        return Err(DashboardError::Encoding(format!("{:?} chart requires a path", kind)));
    }

    if let Some(missing) = encoding.fields().find(|f| !table.has_column(f)) {
        return Err(DashboardError::Encoding(format!(
            "Field '{}' is not a column of the chart data (columns: {})",
            missing,
            table.column_names().join(", ")
        )));
    }

    // Carry only what the chart reads. Hierarchies keep their node ids.
    let mut keep: Vec<&str> = encoding.fields().collect();
    if kind.is_hierarchical() {
        keep.extend(["id", "parent"]);
    }
    let data = table.select(&keep);

    Ok(ChartSpec {
        kind,
        title: None,
        encoding,
        labels: BTreeMap::new(),
        options: ChartOptions::default(),
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Cell, Column};

    fn make_table() -> Table {
        Table::new(vec![
            Column::new("País", vec![Cell::text("Perú")]),
            Column::new("Exportaciones", vec![Cell::Number(4.0)]),
        ])
        .unwrap()
    }

    #[test]
    fn test_build_bar() {
        let enc = Encoding::new().with(Channel::X, "País").with(Channel::Y, "Exportaciones");
        let spec = build(make_table(), ChartKind::Bar, enc).unwrap();
        assert_eq!(spec.kind, ChartKind::Bar);
        assert_eq!(spec.encoding.get(Channel::X), Some("País"));
    }

    #[test]
    fn test_build_rejects_missing_field() {
        let enc = Encoding::new()
            .with(Channel::X, "País")
            .with(Channel::Y, "Exportaciones")
            .hover("MES_NOMBRE");
        let err = build(make_table(), ChartKind::Scatter, enc).unwrap_err();
        assert!(matches!(err, DashboardError::Encoding(msg) if msg.contains("MES_NOMBRE")));
    }

    #[test]
    fn test_build_rejects_missing_channel() {
        let enc = Encoding::new().with(Channel::X, "País");
        assert!(build(make_table(), ChartKind::Line, enc).is_err());
    }

    #[test]
    fn test_build_drops_unused_columns() {
        let table = make_table()
            .with_column(Column::new("PNK", vec![Cell::Number(1.0)]))
            .unwrap();
        let enc = Encoding::new().with(Channel::X, "País").with(Channel::Y, "Exportaciones");
        let spec = build(table, ChartKind::Bar, enc).unwrap();
        assert_eq!(spec.data.column_names(), vec!["País", "Exportaciones"]);
    }

    #[test]
    fn test_hierarchy_requires_path() {
        let enc = Encoding::new().with(Channel::Values, "Exportaciones");
        assert!(build(make_table(), ChartKind::Treemap, enc.clone()).is_err());
        assert!(build(make_table(), ChartKind::Treemap, enc.path(&["País"])).is_ok());
    }

    #[test]
    fn test_serialized_shape() {
        let enc = Encoding::new().with(Channel::X, "País").with(Channel::Y, "Exportaciones");
        let spec = build(make_table(), ChartKind::Bar, enc)
            .unwrap()
            .with_title("Exportaciones por país")
            .with_label("Exportaciones", "Número de Exportaciones");
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["kind"], "bar");
        assert_eq!(json["encoding"]["channels"]["x"], "País");
        assert_eq!(json["data"]["columns"][1]["values"][0], 4.0);
        assert!(json["options"].as_object().unwrap().is_empty());
        assert_eq!(spec.label_for("Exportaciones"), "Número de Exportaciones");
        assert_eq!(spec.label_for("País"), "País");
    }
}
