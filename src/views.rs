// View dispatcher
//
// Every view is a declarative plan: the columns it coerces, and per panel a
// list of stages run against the aggregation engine followed by a chart
// template. `Dispatcher` interprets plans against the loaded table.

use crate::aggregate::{self, AggregationSpec, Metric};
use crate::chart::{self, BarMode, Channel, ChartKind, ChartOptions, ChartSpec, Encoding};
use crate::data::{Cell, Table};
use crate::error::{DashboardError, Result};
use crate::normalize;
use crate::parser::Controls;
use crate::schema::{Field, MONTHS};
use crate::template::{self, Variables};
use crate::DashboardConfig;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

const PAIS: &str = Field::CountryName.column();
const ISO3: &str = Field::CountryIso3.column();
const LAT: &str = Field::Latitude.column();
const LON: &str = Field::Longitude.column();
const FECH: &str = Field::Year.column();
const MES: &str = Field::Month.column();
const FOB: &str = Field::FobMillions.column();
const PNK: &str = Field::NetWeightKg.column();
const VALOR: &str = Field::UnitValue.column();
const VIA: &str = Field::TransportMode.column();
const REGIM: &str = Field::CustomsRegime.column();
const ADUANA: &str = Field::CustomsOffice.column();
const POSAR: &str = Field::TariffPosition.column();

const FOB_SIZE: &str = "FOB_SIZE";

// =============================================================================
// View identifiers
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewId {
    Summary,
    CountryComparison,
    InteractiveMap,
    TransportRegime,
    Logistics,
    DepartmentFob,
    CountryRegime,
    WeightMap,
}

impl ViewId {
    /// Menu order.
    pub const ALL: [ViewId; 8] = [
        ViewId::Summary,
        ViewId::CountryComparison,
        ViewId::InteractiveMap,
        ViewId::TransportRegime,
        ViewId::Logistics,
        ViewId::DepartmentFob,
        ViewId::CountryRegime,
        ViewId::WeightMap,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ViewId::Summary => "Resumen General",
            ViewId::CountryComparison => "Comparativo por País",
            ViewId::InteractiveMap => "Mapa Interactivo",
            ViewId::TransportRegime => "Transporte y Régimen",
            ViewId::Logistics => "Logística y Modalidades de Exportación",
            ViewId::DepartmentFob => "FOB por Departamento",
            ViewId::CountryRegime => "País y Régimen",
            ViewId::WeightMap => "Mapa Mundial de KG",
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            ViewId::Summary => "resumen",
            ViewId::CountryComparison => "comparativo",
            ViewId::InteractiveMap => "mapa",
            ViewId::TransportRegime => "transporte",
            ViewId::Logistics => "logistica",
            ViewId::DepartmentFob => "departamento",
            ViewId::CountryRegime => "pais-regimen",
            ViewId::WeightMap => "mapa-kg",
        }
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ViewId {
    type Err = DashboardError;

    /// Accepts the menu label (case-insensitive, surrounding whitespace
    /// ignored) or the slug.
    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        ViewId::ALL
            .iter()
            .copied()
            .find(|v| v.slug().eq_ignore_ascii_case(wanted) || labels_match(v.label(), wanted))
            .ok_or_else(|| DashboardError::UnknownView(wanted.to_string()))
    }
}

// Labels carry accented letters, which eq_ignore_ascii_case leaves alone.
fn labels_match(label: &str, wanted: &str) -> bool {
    label.to_lowercase() == wanted.to_lowercase()
}

// =============================================================================
// Plans
// =============================================================================

/// One step of a panel pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// Keep rows of the selected country.
    SelectCountry,
    /// Keep rows of the selected department.
    SelectDepartment,
    /// Keep rows whose transport mode is selected; no-op when unset.
    SelectModes,
    Positive(Vec<&'static str>),
    Below { column: &'static str, max_exclusive: f64 },
    Sample { max_rows: usize, seed: u64 },
    /// Keep rows of the `n` most frequent values and remember their rank.
    TopCategories { column: &'static str, n: usize },
    /// Keep rows of the `n` values with the largest metric sums.
    TopBySum { group: &'static str, metric: &'static str, n: usize },
    Aggregate(AggregationSpec),
    /// Reindex by the rank remembered from `TopCategories`.
    ReindexByRank(&'static str),
    ReindexMonths(&'static str),
    SortMonths(&'static str),
    SortAscending(&'static str),
    Scale { column: &'static str, target_max: f64, into: &'static str },
    Rollup { path: Vec<&'static str>, value: &'static str },
}

#[derive(Debug, Clone)]
pub struct ChartTemplate {
    pub kind: ChartKind,
    /// May reference `$country` and `$department`.
    pub title: String,
    pub encoding: Encoding,
    pub labels: Vec<(&'static str, &'static str)>,
    pub options: ChartOptions,
}

#[derive(Debug, Clone)]
pub struct PanelPlan {
    pub stages: Vec<Stage>,
    pub chart: ChartTemplate,
    pub empty_message: &'static str,
}

#[derive(Debug, Clone)]
pub struct ViewPlan {
    pub view: ViewId,
    pub heading: &'static str,
    pub description: Option<&'static str>,
    pub numeric: Vec<&'static str>,
    pub text: Vec<&'static str>,
    /// Month column to canonicalize before any stage runs.
    pub months: Option<&'static str>,
    pub summary: bool,
    pub panels: Vec<PanelPlan>,
}

impl ViewPlan {
    /// Whether any panel runs a stage matching `pred`.
    fn has_stage(&self, pred: impl Fn(&Stage) -> bool) -> bool {
        self.panels.iter().any(|p| p.stages.iter().any(&pred))
    }
}

fn chart_template(kind: ChartKind, title: impl Into<String>, encoding: Encoding) -> ChartTemplate {
    ChartTemplate {
        kind,
        title: title.into(),
        encoding,
        labels: Vec::new(),
        options: ChartOptions::default(),
    }
}

impl ChartTemplate {
    fn label(mut self, field: &'static str, label: &'static str) -> Self {
        self.labels.push((field, label));
        self
    }

    fn options(mut self, options: ChartOptions) -> Self {
        self.options = options;
        self
    }
}

fn scale(name: &str) -> Option<String> {
    Some(name.to_string())
}

fn months() -> Vec<Cell> {
    MONTHS.iter().map(|m| Cell::text(*m)).collect()
}

pub fn plan(view: ViewId, config: &DashboardConfig) -> ViewPlan {
    match view {
        ViewId::Summary => ViewPlan {
            view,
            heading: "Resumen General de Exportaciones",
            description: None,
            numeric: vec![FECH],
            text: vec![],
            months: None,
            summary: true,
            panels: vec![PanelPlan {
                stages: vec![
                    Stage::TopCategories { column: PAIS, n: config.top_countries },
                    Stage::Aggregate(AggregationSpec::new(&[PAIS], vec![Metric::rows().labeled("Exportaciones")])),
                    Stage::ReindexByRank(PAIS),
                ],
                chart: chart_template(
                    ChartKind::Bar,
                    format!("Top {} países por número de exportaciones", config.top_countries),
                    Encoding::new().with(Channel::X, PAIS).with(Channel::Y, "Exportaciones"),
                )
                .label(PAIS, "País")
                .label("Exportaciones", "Número de Exportaciones")
                .options(ChartOptions {
                    color_sequence: vec!["#1f77b4".to_string()],
                    ..Default::default()
                }),
                empty_message: "No hay registros de exportación.",
            }],
        },

        ViewId::CountryComparison => ViewPlan {
            view,
            heading: "Comparativo por País",
            description: Some("Evolución anual del valor FOB y relación entre peso y valor para el país seleccionado."),
            numeric: vec![FECH, FOB, PNK],
            text: vec![],
            months: None,
            summary: false,
            panels: vec![
                PanelPlan {
                    stages: vec![
                        Stage::SelectCountry,
                        Stage::Aggregate(AggregationSpec::new(&[FECH], vec![Metric::sum(FOB)])),
                        Stage::SortAscending(FECH),
                    ],
                    chart: chart_template(
                        ChartKind::Line,
                        "Exportaciones de $country por Año",
                        Encoding::new().with(Channel::X, FECH).with(Channel::Y, FOB),
                    )
                    .label(FOB, "Millones FOB")
                    .label(FECH, "Año")
                    .options(ChartOptions { markers: true, ..Default::default() }),
                    empty_message: "No hay datos para este país.",
                },
                PanelPlan {
                    stages: vec![Stage::SelectCountry, Stage::Positive(vec![FOB, PNK])],
                    chart: chart_template(
                        ChartKind::Scatter,
                        "Relación entre Peso Neto y Valor FOB para $country",
                        Encoding::new()
                            .with(Channel::X, PNK)
                            .with(Channel::Y, FOB)
                            .with(Channel::Size, FOB)
                            .with(Channel::Color, FOB)
                            .hover(MES),
                    )
                    .label(PNK, "Peso Neto (KG)")
                    .label(FOB, "Valor FOB (Millones USD)")
                    .options(ChartOptions { color_scale: scale("Oranges"), ..Default::default() }),
                    empty_message: "No hay datos con peso neto y FOB positivos para este país.",
                },
            ],
        },

        ViewId::InteractiveMap => ViewPlan {
            view,
            heading: "Volumen de exportaciones por país",
            description: Some("Valor FOB exportado por país de destino, total y mes a mes."),
            numeric: vec![LAT, LON, FOB],
            text: vec![],
            months: Some(MES),
            summary: false,
            panels: vec![
                PanelPlan {
                    stages: vec![Stage::Aggregate(AggregationSpec::new(&[PAIS, LAT, LON], vec![Metric::sum(FOB)]))],
                    chart: chart_template(
                        ChartKind::ScatterGeo,
                        "Exportaciones en millones de dólares (FOB)",
                        Encoding::new()
                            .with(Channel::Lat, LAT)
                            .with(Channel::Lon, LON)
                            .with(Channel::Size, FOB)
                            .with(Channel::Color, FOB)
                            .with(Channel::HoverName, PAIS),
                    )
                    .label(FOB, "Valor FOB (Millones USD)")
                    .options(ChartOptions {
                        projection: Some("natural earth".to_string()),
                        color_scale_stops: ["#fff700", "#ffa500", "#ff4500", "#ff0000", "#990000"]
                            .iter()
                            .map(|c| c.to_string())
                            .collect(),
                        ..Default::default()
                    }),
                    empty_message: "No hay datos de exportación por país.",
                },
                PanelPlan {
                    stages: vec![
                        Stage::Aggregate(AggregationSpec::new(&[MES, PAIS, LAT, LON], vec![Metric::sum(FOB)])),
                        Stage::SortMonths(MES),
                    ],
                    chart: chart_template(
                        ChartKind::ScatterGeo,
                        "Evolución mensual de exportaciones en millones de dólares (FOB)",
                        Encoding::new()
                            .with(Channel::Lat, LAT)
                            .with(Channel::Lon, LON)
                            .with(Channel::Size, FOB)
                            .with(Channel::Color, FOB)
                            .with(Channel::HoverName, PAIS)
                            .with(Channel::AnimationFrame, MES),
                    )
                    .label(FOB, "Valor FOB (Millones USD)")
                    .label(MES, "Mes")
                    .options(ChartOptions {
                        projection: Some("natural earth".to_string()),
                        color_scale: scale("OrRd"),
                        height: Some(600),
                        ..Default::default()
                    }),
                    empty_message: "No hay datos mensuales de exportación.",
                },
            ],
        },

        ViewId::TransportRegime => ViewPlan {
            view,
            heading: "Cantidad de exportaciones por tipo de transporte y régimen",
            description: None,
            numeric: vec![VALOR],
            text: vec![REGIM],
            months: None,
            summary: false,
            panels: vec![
                PanelPlan {
                    stages: vec![
                        Stage::SelectModes,
                        Stage::Aggregate(AggregationSpec::new(&[VIA, REGIM], vec![Metric::rows().labeled("Cantidad")])),
                    ],
                    chart: chart_template(
                        ChartKind::Bar,
                        "Cantidad de exportaciones por tipo de transporte y régimen",
                        Encoding::new()
                            .with(Channel::X, VIA)
                            .with(Channel::Y, "Cantidad")
                            .with(Channel::Color, REGIM),
                    )
                    .label(VIA, "Medio de Transporte")
                    .label(REGIM, "Régimen")
                    .options(ChartOptions { bar_mode: Some(BarMode::Stack), ..Default::default() }),
                    empty_message: "No hay exportaciones para los medios de transporte seleccionados.",
                },
                PanelPlan {
                    stages: vec![
                        Stage::Below { column: VALOR, max_exclusive: config.unit_value_max },
                        Stage::Sample { max_rows: config.sample_rows, seed: config.sample_seed },
                    ],
                    chart: chart_template(
                        ChartKind::Box,
                        format!(
                            "Distribución del Valor Unitario por Medio de Transporte (muestra de {} registros)",
                            config.sample_rows
                        ),
                        Encoding::new()
                            .with(Channel::X, VIA)
                            .with(Channel::Y, VALOR)
                            .with(Channel::Color, VIA),
                    )
                    .label(VIA, "Medio de Transporte")
                    .label(VALOR, "Valor Unitario ($)")
                    .options(ChartOptions { box_points: Some("outliers".to_string()), ..Default::default() }),
                    empty_message: "No hay valores unitarios por debajo del umbral.",
                },
            ],
        },

        ViewId::Logistics => ViewPlan {
            view,
            heading: "Análisis Avanzado de Exportaciones",
            description: Some("Valor FOB frente a peso neto por medio de transporte y perfil medio por régimen."),
            numeric: vec![FOB, PNK],
            text: vec![REGIM],
            months: None,
            summary: false,
            panels: vec![
                PanelPlan {
                    stages: vec![
                        Stage::Positive(vec![FOB, PNK]),
                        Stage::Scale { column: FOB, target_max: config.bubble_size_max, into: FOB_SIZE },
                    ],
                    chart: chart_template(
                        ChartKind::Scatter,
                        "Relación entre Valor FOB y Peso Neto Exportado (por país y medio)",
                        Encoding::new()
                            .with(Channel::X, FOB)
                            .with(Channel::Y, PNK)
                            .with(Channel::Size, FOB_SIZE)
                            .with(Channel::Color, VIA)
                            .with(Channel::HoverName, PAIS),
                    )
                    .label(FOB, "Valor FOB (Millones USD)")
                    .label(PNK, "Peso Neto (KG)")
                    .label(VIA, "Medio de Transporte")
                    .options(ChartOptions { height: Some(600), ..Default::default() }),
                    empty_message: "No hay registros con valor FOB y peso neto positivos.",
                },
                PanelPlan {
                    stages: vec![
                        Stage::Positive(vec![FOB]),
                        Stage::Aggregate(AggregationSpec::new(&[REGIM, VIA], vec![Metric::mean(FOB)])),
                    ],
                    chart: chart_template(
                        ChartKind::Radar,
                        "Perfil de Exportaciones por Régimen y Medio de Transporte",
                        Encoding::new()
                            .with(Channel::R, FOB)
                            .with(Channel::Theta, VIA)
                            .with(Channel::Color, REGIM),
                    )
                    .label(FOB, "FOB promedio (Millones USD)")
                    .label(REGIM, "Régimen")
                    .options(ChartOptions { height: Some(600), ..Default::default() }),
                    empty_message: "No hay registros con valor FOB positivo.",
                },
            ],
        },

        ViewId::DepartmentFob => ViewPlan {
            view,
            heading: "Distribución Jerárquica de Exportaciones FOB",
            description: Some("Valor FOB por departamento de origen y régimen, y su evolución mensual."),
            numeric: vec![FOB],
            text: vec![REGIM],
            months: Some(MES),
            summary: false,
            panels: vec![
                PanelPlan {
                    stages: vec![Stage::Rollup { path: vec![ADUANA, REGIM], value: FOB }],
                    chart: chart_template(
                        ChartKind::Sunburst,
                        "Exportaciones FOB por Departamento y Régimen",
                        Encoding::new()
                            .with(Channel::Values, FOB)
                            .with(Channel::Color, FOB)
                            .path(&[ADUANA, REGIM]),
                    )
                    .label(FOB, "Valor FOB (Millones USD)")
                    .label(ADUANA, "Departamento")
                    .options(ChartOptions {
                        color_scale: scale("YlOrRd"),
                        height: Some(700),
                        text_info: Some("label+percent entry+value".to_string()),
                        ..Default::default()
                    }),
                    empty_message: "No hay datos por departamento.",
                },
                PanelPlan {
                    stages: vec![
                        Stage::SelectDepartment,
                        Stage::Aggregate(AggregationSpec::new(&[MES], vec![Metric::sum(FOB)])),
                        Stage::ReindexMonths(MES),
                    ],
                    chart: chart_template(
                        ChartKind::Bar,
                        "Exportaciones mensuales desde $department",
                        Encoding::new()
                            .with(Channel::X, MES)
                            .with(Channel::Y, FOB)
                            .with(Channel::Color, FOB),
                    )
                    .label(MES, "Mes")
                    .label(FOB, "Valor FOB (Millones USD)")
                    .options(ChartOptions { color_scale: scale("Blues"), ..Default::default() }),
                    empty_message: "No hay exportaciones mensuales para este departamento.",
                },
            ],
        },

        ViewId::CountryRegime => ViewPlan {
            view,
            heading: "Análisis Interactivo de Exportaciones por País y Régimen",
            description: None,
            numeric: vec![FOB, PNK, FECH],
            text: vec![REGIM, POSAR],
            months: None,
            summary: false,
            panels: vec![
                PanelPlan {
                    stages: vec![
                        Stage::TopBySum { group: PAIS, metric: FOB, n: config.treemap_countries },
                        Stage::Rollup { path: vec![PAIS, REGIM, POSAR], value: FOB },
                    ],
                    chart: chart_template(
                        ChartKind::Treemap,
                        format!(
                            "Treemap de Exportaciones FOB por País, Régimen y Producto (Top {} países)",
                            config.treemap_countries
                        ),
                        Encoding::new()
                            .with(Channel::Values, FOB)
                            .with(Channel::Color, FOB)
                            .path(&[PAIS, REGIM, POSAR]),
                    )
                    .label(FOB, "Valor FOB (Millones USD)")
                    .options(ChartOptions { color_scale: scale("YlGnBu"), ..Default::default() }),
                    empty_message: "No hay datos de exportación por país.",
                },
                PanelPlan {
                    stages: vec![
                        Stage::Aggregate(AggregationSpec::new(
                            &[FECH, PAIS],
                            vec![
                                Metric::sum(FOB),
                                Metric::sum(PNK),
                                Metric::rows().labeled("Cantidad_Productos"),
                            ],
                        )),
                        Stage::SortAscending(FECH),
                    ],
                    chart: chart_template(
                        ChartKind::Scatter,
                        "Evolución de Exportaciones por País",
                        Encoding::new()
                            .with(Channel::X, PNK)
                            .with(Channel::Y, FOB)
                            .with(Channel::AnimationFrame, FECH)
                            .with(Channel::AnimationGroup, PAIS)
                            .with(Channel::Size, "Cantidad_Productos")
                            .with(Channel::Color, PAIS)
                            .with(Channel::HoverName, PAIS),
                    )
                    .label(PNK, "Peso Neto (KG)")
                    .label(FOB, "Valor FOB (Millones USD)")
                    .label(FECH, "Año")
                    .label("Cantidad_Productos", "Cantidad de Productos")
                    .options(ChartOptions { size_max: Some(50.0), height: Some(600), ..Default::default() }),
                    empty_message: "No hay datos anuales por país.",
                },
            ],
        },

        ViewId::WeightMap => ViewPlan {
            view,
            heading: "Mapa Mundial de Exportaciones en Kilogramos",
            description: Some("Peso neto exportado por país de destino."),
            numeric: vec![PNK],
            text: vec![],
            months: None,
            summary: false,
            panels: vec![PanelPlan {
                stages: vec![Stage::Aggregate(AggregationSpec::new(&[ISO3], vec![Metric::sum(PNK)]))],
                chart: chart_template(
                    ChartKind::Choropleth,
                    "Mapa Mundial de Exportaciones por Peso (KG)",
                    Encoding::new().with(Channel::Locations, ISO3).with(Channel::Color, PNK),
                )
                .label(PNK, "Kilogramos Exportados")
                .options(ChartOptions {
                    location_mode: Some("ISO-3".to_string()),
                    projection: Some("natural earth".to_string()),
                    color_scale: scale("YlOrRd"),
                    height: Some(650),
                    ..Default::default()
                }),
                empty_message: "No hay datos de peso neto por país.",
            }],
        },
    }
}

// =============================================================================
// Output
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryMetric {
    pub label: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Panel {
    Chart(ChartSpec),
    NoData { title: String, message: String },
}

impl Panel {
    pub fn chart(&self) -> Option<&ChartSpec> {
        match self {
            Panel::Chart(spec) => Some(spec),
            Panel::NoData { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewOutput {
    pub view: &'static str,
    pub slug: &'static str,
    pub title: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'static str>,
    /// The country/department the panels were filtered by.
    pub selections: std::collections::BTreeMap<&'static str, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<SummaryMetric>,
    pub panels: Vec<Panel>,
}

/// Values offered by the secondary controls.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlOptions {
    pub countries: Vec<String>,
    pub transport_modes: Vec<String>,
    pub departments: Vec<String>,
}

// =============================================================================
// Dispatcher
// =============================================================================

struct Selections {
    country: Option<Cell>,
    department: Option<Cell>,
    modes: Option<Vec<Cell>>,
}

impl Selections {
    fn resolve(table: &Table, controls: &Controls) -> Result<Self> {
        let pick = |chosen: &Option<String>, column: &str| -> Result<Option<Cell>> {
            match chosen {
                Some(value) => Ok(Some(Cell::text(value.clone()))),
                None => Ok(aggregate::distinct_values(table, column)?.into_iter().next()),
            }
        };
        Ok(Self {
            country: pick(&controls.country, PAIS)?,
            department: pick(&controls.department, ADUANA)?,
            modes: controls
                .transport_modes
                .as_ref()
                .map(|modes| modes.iter().map(|m| Cell::text(m.clone())).collect()),
        })
    }

    fn variables(&self) -> Variables {
        let show = |cell: &Option<Cell>| cell.as_ref().map(Cell::to_string).unwrap_or_default();
        let mut vars = Variables::new();
        vars.insert("country", show(&self.country));
        vars.insert("department", show(&self.department));
        vars
    }
}

/// Runs view plans against a loaded dataset.
pub struct Dispatcher {
    table: Arc<Table>,
    config: DashboardConfig,
}

impl Dispatcher {
    pub fn new(table: Arc<Table>, config: DashboardConfig) -> Self {
        Self { table, config }
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    /// Resolve `name` and run that view.
    pub fn dispatch(&self, name: &str, controls: &Controls) -> Result<ViewOutput> {
        self.run(name.parse()?, controls)
    }

    pub fn run(&self, view: ViewId, controls: &Controls) -> Result<ViewOutput> {
        let plan = plan(view, &self.config);
        let table = prepare(&self.table, &plan)?;
        let selections = Selections::resolve(&table, controls)?;
        let variables = selections.variables();

        let metrics = if plan.summary { summary_metrics(&table)? } else { Vec::new() };

        let mut panels = Vec::with_capacity(plan.panels.len());
        for (i, panel) in plan.panels.iter().enumerate() {
            let mut rank = None;
            let mut current = table.clone();
            for stage in &panel.stages {
                current = run_stage(stage, current, &mut rank, &selections)?;
            }
            debug!(view = view.slug(), panel = i, rows = current.height(), "panel pipeline finished");
            panels.push(finish_panel(current, &panel.chart, panel.empty_message, &variables)?);
        }

        info!(
            view = view.slug(),
            panels = panels.len(),
            empty = panels.iter().filter(|p| p.chart().is_none()).count(),
            "view dispatched"
        );

        let used = |name: &str| match name {
            "country" => plan.has_stage(|s| matches!(s, Stage::SelectCountry)),
            "department" => plan.has_stage(|s| matches!(s, Stage::SelectDepartment)),
            _ => false,
        };
        let chosen = variables
            .into_iter()
            .filter(|(name, value)| !value.is_empty() && used(*name))
            .collect();

        Ok(ViewOutput {
            view: view.label(),
            slug: view.slug(),
            title: plan.heading,
            description: plan.description,
            selections: chosen,
            metrics,
            panels,
        })
    }

    /// Sorted option lists for the country, transport-mode and department
    /// controls.
    pub fn options(&self) -> Result<ControlOptions> {
        let list = |column: &str| -> Result<Vec<String>> {
            Ok(aggregate::distinct_values(&self.table, column)?
                .iter()
                .map(Cell::to_string)
                .collect())
        };
        Ok(ControlOptions {
            countries: list(PAIS)?,
            transport_modes: list(VIA)?,
            departments: list(ADUANA)?,
        })
    }
}

/// Private copy of the table with the view's columns coerced.
fn prepare(table: &Table, plan: &ViewPlan) -> Result<Table> {
    let mut prepared = table.clone();
    for column in &plan.numeric {
        prepared = normalize::coerce_numeric(&prepared, column)?;
    }
    for column in &plan.text {
        prepared = normalize::coerce_text(&prepared, column)?;
    }
    if let Some(column) = plan.months {
        prepared = normalize::canonicalize_months(&prepared, column)?.0;
    }
    Ok(prepared)
}

fn run_stage(stage: &Stage, table: Table, rank: &mut Option<Vec<Cell>>, sel: &Selections) -> Result<Table> {
    match stage {
        Stage::SelectCountry => match &sel.country {
            Some(country) => aggregate::filter_eq(&table, PAIS, country),
            None => Ok(table.empty_like()),
        },
        Stage::SelectDepartment => match &sel.department {
            Some(department) => aggregate::filter_eq(&table, ADUANA, department),
            None => Ok(table.empty_like()),
        },
        Stage::SelectModes => match &sel.modes {
            Some(modes) => aggregate::filter_in(&table, VIA, modes),
            None => Ok(table),
        },
        Stage::Positive(columns) => aggregate::filter_positive(&table, columns),
        Stage::Below { column, max_exclusive } => aggregate::filter_range(&table, column, *max_exclusive),
        Stage::Sample { max_rows, seed } => Ok(aggregate::bounded_sample(&table, *max_rows, *seed)),
        Stage::TopCategories { column, n } => {
            let top = aggregate::top_n_categories(&table, column, *n)?;
            let kept = aggregate::filter_in(&table, column, &top)?;
            *rank = Some(top);
            Ok(kept)
        }
        Stage::TopBySum { group, metric, n } => {
            let top = aggregate::top_n_by_sum(&table, group, metric, *n)?;
            aggregate::filter_in(&table, group, &top)
        }
        Stage::Aggregate(spec) => aggregate::aggregate(&table, spec),
        Stage::ReindexByRank(column) => match rank.as_deref() {
            Some(order) => aggregate::reindex_by_fixed_order(&table, column, order),
            None => Ok(table),
        },
        Stage::ReindexMonths(column) => aggregate::reindex_by_fixed_order(&table, column, &months()),
        Stage::SortMonths(column) => aggregate::sort_by_fixed_order(&table, column, &months()),
        Stage::SortAscending(column) => aggregate::sort_ascending(&table, column),
        Stage::Scale { column, target_max, into } => aggregate::normalize_scale(&table, column, *target_max, into),
        Stage::Rollup { path, value } => Ok(aggregate::hierarchical_rollup(&table, path, value)?.to_table()),
    }
}

/// The channel whose values a panel exists to show.
fn measure(encoding: &Encoding) -> Option<&str> {
    [Channel::Y, Channel::Values, Channel::R, Channel::Size, Channel::Color]
        .into_iter()
        .find_map(|c| encoding.get(c))
}

fn finish_panel(table: Table, chart: &ChartTemplate, empty_message: &str, variables: &Variables) -> Result<Panel> {
    let title = template::expand(&chart.title, variables)?;

    let all_null = match measure(&chart.encoding) {
        Some(field) => table.cells(field).map(|c| c.iter().all(Cell::is_null)).unwrap_or(false),
        None => false,
    };
    if table.is_empty() || all_null {
        return Ok(Panel::NoData {
            title,
            message: template::expand(empty_message, variables)?,
        });
    }

    let mut spec = chart::build(table, chart.kind, chart.encoding.clone())?
        .with_title(title)
        .with_options(chart.options.clone());
    for (field, label) in &chart.labels {
        spec = spec.with_label(field, label);
    }
    Ok(Panel::Chart(spec))
}

fn summary_metrics(table: &Table) -> Result<Vec<SummaryMetric>> {
    let countries = aggregate::distinct_values(table, PAIS)?.len();
    let latest_year = table
        .cells(FECH)?
        .iter()
        .filter_map(Cell::as_f64)
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.max(v))));

    Ok(vec![
        SummaryMetric { label: "Total de registros", value: thousands(table.height()) },
        SummaryMetric { label: "Países únicos", value: countries.to_string() },
        SummaryMetric {
            label: "Año más reciente",
            value: latest_year.map_or_else(|| "No disponible".to_string(), |y| Cell::Number(y).to_string()),
        },
    ])
}

/// `12345` → `"12,345"`.
fn thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
