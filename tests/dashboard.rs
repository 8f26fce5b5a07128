use exportdash::data::Cell;
use exportdash::loader::{DataSource, DatasetLoader};
use exportdash::parser::{parse_controls, Controls};
use exportdash::views::{Dispatcher, Panel, ViewId};
use exportdash::{DashboardConfig, DashboardError};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/exports.csv")
}

fn dispatcher_with(config: DashboardConfig) -> Dispatcher {
    let loader = DatasetLoader::new(DataSource::Path(fixture_path()), Duration::from_secs(5));
    Dispatcher::new(loader.load().expect("fixture loads"), config)
}

fn dispatcher() -> Dispatcher {
    dispatcher_with(DashboardConfig::default())
}

fn controls(text: &str) -> Controls {
    parse_controls(text).expect("controls parse").1
}

#[test]
fn test_loader_memoizes_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("exports.csv");
    fs::copy(fixture_path(), &path).unwrap();

    let loader = DatasetLoader::new(DataSource::Path(path.clone()), Duration::from_secs(5));
    assert!(!loader.is_loaded());
    let first = loader.load().unwrap();
    assert_eq!(first.height(), 12);

    // The file is gone but the snapshot is not reloaded
    fs::remove_file(&path).unwrap();
    let second = loader.load().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn test_loader_rejects_missing_columns() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("partial.csv");
    fs::write(&path, "NOMBRE_PAIS,FOBDOL_MILLONES\nPerú,1.0\n").unwrap();

    let loader = DatasetLoader::new(DataSource::Path(path), Duration::from_secs(5));
    match loader.load() {
        Err(DashboardError::Schema(missing)) => {
            assert!(missing.contains(&"PNK".to_string()));
            assert!(!missing.contains(&"NOMBRE_PAIS".to_string()));
        }
        other => panic!("expected schema error, got {:?}", other.map(|t| t.height())),
    }
}

#[test]
fn test_every_view_serializes() {
    let d = dispatcher();
    for view in ViewId::ALL {
        let out = d.dispatch(view.slug(), &Controls::default()).unwrap();
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["view"], view.label());
        assert!(json["panels"].as_array().is_some_and(|p| !p.is_empty()));
    }
}

#[test]
fn test_unknown_view() {
    let err = dispatcher().dispatch("Ventas", &Controls::default()).unwrap_err();
    assert!(matches!(err, DashboardError::UnknownView(name) if name == "Ventas"));
}

#[test]
fn test_summary_metrics_and_top_countries() {
    let out = dispatcher().dispatch("Resumen General", &Controls::default()).unwrap();
    let values: Vec<&str> = out.metrics.iter().map(|m| m.value.as_str()).collect();
    assert_eq!(values, vec!["12", "6", "2023"]);

    // Every country has two records; ties keep first-occurrence order
    let bar = out.panels[0].chart().unwrap();
    let countries = bar.data.cells("NOMBRE_PAIS").unwrap();
    assert_eq!(countries.len(), 6);
    assert_eq!(countries[0], Cell::text("Estados Unidos"));
    assert_eq!(countries[5], Cell::text("Países Bajos"));
}

#[test]
fn test_country_comparison() {
    let out = dispatcher()
        .dispatch("comparativo", &controls(r#"country: "Perú""#))
        .unwrap();
    let line = out.panels[0].chart().unwrap();
    assert_eq!(line.data.cells("FECH").unwrap(), &[Cell::Number(2022.0), Cell::Number(2023.0)]);
    assert_eq!(line.data.cells("FOBDOL_MILLONES").unwrap(), &[Cell::Number(3.2), Cell::Number(1.8)]);

    // The 2023 shipment has zero weight
    let scatter = out.panels[1].chart().unwrap();
    assert_eq!(scatter.data.height(), 1);
}

#[test]
fn test_department_months() {
    let out = dispatcher().dispatch("FOB por Departamento", &Controls::default()).unwrap();
    assert_eq!(out.selections.get("department").map(String::as_str), Some("Bogotá"));

    let bar = out.panels[1].chart().unwrap();
    let months = bar.data.cells("MES_NOMBRE").unwrap();
    assert_eq!(months.len(), 12);
    assert_eq!(months[0], Cell::text("Enero"));
    assert_eq!(months[11], Cell::text("Diciembre"));

    let fob = bar.data.cells("FOBDOL_MILLONES").unwrap();
    assert_eq!(fob[0], Cell::Number(12.5));
    assert_eq!(fob[4], Cell::Number(0.0));
    assert_eq!(fob[7], Cell::Number(7.1));
    // "Setiembre" is not a month label, so September stays empty
    assert!(fob[8].is_null());
    assert!(fob[1].is_null());
}

#[test]
fn test_department_without_records() {
    let out = dispatcher()
        .dispatch("departamento", &controls(r#"department: "Leticia""#))
        .unwrap();
    assert!(matches!(out.panels[1], Panel::NoData { .. }));
    // The sunburst ignores the department control
    assert!(out.panels[0].chart().is_some());
}

#[test]
fn test_transport_box_plot_sample() {
    let mut config = DashboardConfig::default();
    config.sample_rows = 4;
    let d = dispatcher_with(config);

    let first = d.dispatch("transporte", &Controls::default()).unwrap();
    let second = d.dispatch("transporte", &Controls::default()).unwrap();
    let boxplot = first.panels[1].chart().unwrap();
    assert_eq!(boxplot.data.height(), 4);
    assert_eq!(first.panels[1], second.panels[1]);

    let unsampled = dispatcher().dispatch("transporte", &Controls::default()).unwrap();
    // 75000 is an outlier and one unit value is missing
    assert_eq!(unsampled.panels[1].chart().unwrap().data.height(), 10);
}

#[test]
fn test_transport_mode_selection() {
    let out = dispatcher()
        .dispatch("transporte", &controls(r#"modes: ["Terrestre"]"#))
        .unwrap();
    let bar = out.panels[0].chart().unwrap();
    assert_eq!(bar.data.cells("VIA_TRANSPORTE").unwrap(), &[Cell::text("Terrestre")]);
    assert_eq!(bar.data.cells("Cantidad").unwrap(), &[Cell::Number(3.0)]);
}

#[test]
fn test_treemap_top_countries() {
    let mut config = DashboardConfig::default();
    config.treemap_countries = 2;
    let out = dispatcher_with(config).dispatch("pais-regimen", &Controls::default()).unwrap();
    let treemap = out.panels[0].chart().unwrap();

    let ids: Vec<String> = treemap.data.cells("id").unwrap().iter().map(Cell::to_string).collect();
    assert_eq!(&ids[..2], &["Estados Unidos".to_string(), "Países Bajos".to_string()]);
    assert!(ids.contains(&"Estados Unidos/10/0901110000".to_string()));
    assert!(!ids.iter().any(|id| id.starts_with("Chile")));

    let leaf = ids.iter().position(|id| id == "Estados Unidos/10/0901110000").unwrap();
    assert_eq!(treemap.data.cells("FOBDOL_MILLONES").unwrap()[leaf], Cell::Number(32.5));
}

#[test]
fn test_weight_map() {
    let out = dispatcher().dispatch("Mapa Mundial de KG", &Controls::default()).unwrap();
    let map = out.panels[0].chart().unwrap();
    assert_eq!(map.data.cells("COD_PAI4").unwrap()[0], Cell::text("USA"));
    assert_eq!(map.data.cells("PNK").unwrap()[0], Cell::Number(3900.0));
    assert_eq!(map.options.location_mode.as_deref(), Some("ISO-3"));
}

#[test]
fn test_animated_map_frames_in_month_order() {
    let out = dispatcher().dispatch("mapa", &Controls::default()).unwrap();
    let animated = out.panels[1].chart().unwrap();
    let months = animated.data.cells("MES_NOMBRE").unwrap();
    assert_eq!(months.first(), Some(&Cell::text("Enero")));
    assert_eq!(months.last(), Some(&Cell::text("Diciembre")));
    // Setiembre is dropped; Marzo appears once per country
    assert_eq!(months.len(), 10);
}

#[test]
fn test_control_options() {
    let options = dispatcher().options().unwrap();
    assert_eq!(options.countries.len(), 6);
    assert_eq!(options.transport_modes, vec!["Aéreo", "Marítimo", "Terrestre"]);
    assert_eq!(options.departments.first().map(String::as_str), Some("Bogotá"));
}
