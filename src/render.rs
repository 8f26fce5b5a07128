// PNG preview of chart specs
//
// Only the cartesian kinds (bar, line, scatter) have a raster renderer. Maps,
// hierarchies, radar and box charts are left to the interactive front end.

use crate::chart::{BarMode, Channel, ChartKind, ChartSpec};
use crate::data::{Cell, CellKey};
use crate::error::DashboardError;
use anyhow::{Context, Result};
use image::ImageEncoder;
use plotters::prelude::*;
use std::collections::HashMap;
use std::ops::Range;

/// Qualitative palette used when a chart does not bring its own.
const PALETTE: [&str; 8] = [
    "#636efa", "#ef553b", "#00cc96", "#ab63fa", "#ffa15a", "#19d3f3", "#ff6692", "#b6e880",
];

/// One colored group of marks.
#[derive(Debug, Clone, PartialEq)]
struct Series {
    name: String,
    color: RGBColor,
    /// Row indices of the chart data belonging to this series.
    rows: Vec<usize>,
}

/// Canvas that draws one chart into an RGB buffer.
struct Canvas {
    buffer: Vec<u8>,
    width: u32,
    height: u32,
    title: String,
}

impl Canvas {
    fn new(width: u32, height: u32, title: &str) -> Self {
        Canvas {
            buffer: vec![0u8; (width * height * 3) as usize],
            width,
            height,
            title: title.to_string(),
        }
    }

    fn draw_bars(
        &mut self,
        categories: &[String],
        series: &[(Series, Vec<f64>)],
        mode: BarMode,
        y_range: Range<f64>,
    ) -> Result<()> {
        let root = BitMapBackend::with_buffer(&mut self.buffer, (self.width, self.height)).into_drawing_area();
        root.fill(&WHITE).context("Failed to fill background")?;

        let num_categories = categories.len();
        let mut chart = ChartBuilder::on(&root)
            .margin(10)
            .caption(&self.title, ("sans-serif", 20))
            .x_label_area_size(40)
            .y_label_area_size(60)
            .build_cartesian_2d(0.0..(num_categories as f64), y_range)
            .context("Failed to build chart")?;

        chart
            .configure_mesh()
            .x_labels(num_categories)
            .x_label_formatter(&|x| categories.get(*x as usize).cloned().unwrap_or_default())
            .draw()
            .context("Failed to draw mesh")?;

        match mode {
            BarMode::Group => {
                let bar_width = 0.8 / series.len() as f64;
                for (series_idx, (s, totals)) in series.iter().enumerate() {
                    let offset = (series_idx as f64 - (series.len() as f64 - 1.0) / 2.0) * bar_width;
                    for (cat_idx, &y) in totals.iter().enumerate() {
                        let x_center = cat_idx as f64 + 0.5 + offset;
                        chart
                            .draw_series(std::iter::once(Rectangle::new(
                                [(x_center - bar_width / 2.0, 0.0), (x_center + bar_width / 2.0, y)],
                                s.color.filled(),
                            )))
                            .context("Failed to draw bar")?;
                    }
                }
            }
            BarMode::Stack => {
                for cat_idx in 0..num_categories {
                    let x_center = cat_idx as f64 + 0.5;
                    let mut base = 0.0;
                    for (s, totals) in series {
                        let y = totals[cat_idx];
                        chart
                            .draw_series(std::iter::once(Rectangle::new(
                                [(x_center - 0.4, base), (x_center + 0.4, base + y)],
                                s.color.filled(),
                            )))
                            .context("Failed to draw bar")?;
                        base += y;
                    }
                }
            }
        }

        root.present().context("Failed to present drawing")?;
        Ok(())
    }

    fn draw_xy(
        &mut self,
        points: &[(f64, f64, i32)],
        series: &[Series],
        lines: bool,
        markers: bool,
        x_range: Range<f64>,
        y_range: Range<f64>,
    ) -> Result<()> {
        let root = BitMapBackend::with_buffer(&mut self.buffer, (self.width, self.height)).into_drawing_area();
        root.fill(&WHITE).context("Failed to fill background")?;

        let mut chart = ChartBuilder::on(&root)
            .margin(10)
            .caption(&self.title, ("sans-serif", 20))
            .x_label_area_size(40)
            .y_label_area_size(60)
            .build_cartesian_2d(x_range, y_range)
            .context("Failed to build chart")?;

        chart.configure_mesh().draw().context("Failed to draw mesh")?;

        let legend = series.len() > 1;
        for s in series {
            let xy: Vec<(f64, f64, i32)> = s.rows.iter().filter_map(|&r| points.get(r).copied()).collect();
            let color = s.color;
            if lines {
                let anno = chart
                    .draw_series(LineSeries::new(xy.iter().map(|&(x, y, _)| (x, y)), color.stroke_width(2)))
                    .context("Failed to draw line series")?;
                if legend && !markers {
                    anno.label(s.name.as_str())
                        .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
                }
            }
            if markers {
                let anno = chart
                    .draw_series(xy.iter().map(|&(x, y, size)| Circle::new((x, y), size, color.mix(0.7).filled())))
                    .context("Failed to draw point series")?;
                if legend {
                    anno.label(s.name.as_str())
                        .legend(move |(x, y)| Circle::new((x, y), 4, color.filled()));
                }
            }
        }

        if legend {
            chart
                .configure_series_labels()
                .background_style(WHITE.mix(0.8))
                .border_style(BLACK)
                .draw()
                .context("Failed to draw legend")?;
        }

        root.present().context("Failed to present drawing")?;
        Ok(())
    }

    fn encode(self) -> Result<Vec<u8>> {
        let mut png_bytes = Vec::new();
        {
            let encoder = image::codecs::png::PngEncoder::new(&mut png_bytes);
            encoder
                .write_image(&self.buffer, self.width, self.height, image::ColorType::Rgb8)
                .context("Failed to encode PNG")?;
        }
        Ok(png_bytes)
    }
}

/// Render `spec` as a PNG of the given size.
pub fn render_png(spec: &ChartSpec, width: u32, height: u32) -> Result<Vec<u8>> {
    if !matches!(spec.kind, ChartKind::Bar | ChartKind::Line | ChartKind::Scatter) {
        return Err(DashboardError::Render(format!("no PNG renderer for {:?} charts", spec.kind)).into());
    }
    if spec.data.is_empty() {
        return Err(DashboardError::Render("chart has no rows".into()).into());
    }

    let title = spec.title.as_deref().unwrap_or("");
    let mut canvas = Canvas::new(width, height, title);

    match spec.kind {
        ChartKind::Bar => {
            let x_field = channel(spec, Channel::X)?;
            let y_field = channel(spec, Channel::Y)?;
            let xs = spec.data.cells(x_field)?;
            let ys = spec.data.cells(y_field)?;

            let (labels, category_of) = categories(xs);
            let groups = series_for(spec, y_field)?;
            let totals: Vec<(Series, Vec<f64>)> = groups
                .into_iter()
                .map(|s| {
                    let mut sums = vec![0.0; labels.len()];
                    for &row in &s.rows {
                        if let (Some(&cat), Some(y)) = (category_of.get(row).and_then(Option::as_ref), ys[row].as_f64()) {
                            sums[cat] += y;
                        }
                    }
                    (s, sums)
                })
                .collect();

            let mode = spec.options.bar_mode.unwrap_or(BarMode::Group);
            let extent: Vec<f64> = match mode {
                BarMode::Stack => (0..labels.len())
                    .map(|c| totals.iter().map(|(_, sums)| sums[c]).sum::<f64>())
                    .collect(),
                BarMode::Group => totals.iter().flat_map(|(_, sums)| sums.iter().copied()).collect(),
            };
            let mut y_values = extent;
            y_values.push(0.0);
            canvas
                .draw_bars(&labels, &totals, mode, padded_range(&y_values))
                .with_context(|| format!("Failed to render bar chart '{}'", title))?;
        }
        ChartKind::Line | ChartKind::Scatter => {
            let xs = spec.data.cells(channel(spec, Channel::X)?)?;
            let y_field = channel(spec, Channel::Y)?;
            let ys = spec.data.cells(y_field)?;
            let sizes = marker_sizes(spec)?;

            // Rows with a missing coordinate keep their slot but are never drawn
            let points: Vec<(f64, f64, i32)> = xs
                .iter()
                .zip(ys)
                .zip(&sizes)
                .map(|((x, y), &s)| (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN), s))
                .collect();
            let mut groups = series_for(spec, y_field)?;
            for s in &mut groups {
                s.rows.retain(|&r| points[r].0.is_finite() && points[r].1.is_finite());
            }

            let finite: Vec<&(f64, f64, i32)> = points.iter().filter(|p| p.0.is_finite() && p.1.is_finite()).collect();
            if finite.is_empty() {
                return Err(DashboardError::Render("chart has no numeric points".into()).into());
            }
            let x_range = padded_range(&finite.iter().map(|p| p.0).collect::<Vec<_>>());
            let y_range = padded_range(&finite.iter().map(|p| p.1).collect::<Vec<_>>());

            let lines = spec.kind == ChartKind::Line;
            let markers = !lines || spec.options.markers;
            canvas
                .draw_xy(&points, &groups, lines, markers, x_range, y_range)
                .with_context(|| format!("Failed to render {:?} chart '{}'", spec.kind, title))?;
        }
        _ => unreachable!("kind checked above"),
    }

    canvas.encode()
}

fn channel(spec: &ChartSpec, channel: Channel) -> Result<&str> {
    spec.encoding
        .get(channel)
        .ok_or_else(|| DashboardError::Encoding(format!("{:?} chart has no {:?} field", spec.kind, channel)).into())
}

/// Distinct display labels of `cells` in first-occurrence order, plus the
/// category index of every row.
fn categories(cells: &[Cell]) -> (Vec<String>, Vec<Option<usize>>) {
    let mut labels = Vec::new();
    let mut index: HashMap<CellKey, usize> = HashMap::new();
    let per_row: Vec<Option<usize>> = cells
        .iter()
        .map(|cell| {
            let key = cell.key()?;
            Some(*index.entry(key).or_insert_with(|| {
                labels.push(cell.to_string());
                labels.len() - 1
            }))
        })
        .collect();
    (labels, per_row)
}

/// Split rows by a categorical color channel. A numeric color channel, or
/// none, gives a single series.
fn series_for(spec: &ChartSpec, y_field: &str) -> Result<Vec<Series>> {
    let colors = colors(spec);
    let all_rows = || (0..spec.data.height()).collect::<Vec<_>>();

    let Some(color_field) = spec.encoding.get(Channel::Color) else {
        return Ok(vec![Series { name: y_field.to_string(), color: colors[0], rows: all_rows() }]);
    };
    let cells = spec.data.cells(color_field)?;
    if cells.iter().all(|c| c.is_null() || c.as_f64().is_some()) {
        return Ok(vec![Series { name: y_field.to_string(), color: colors[0], rows: all_rows() }]);
    }

    let (names, group_of) = categories(cells);
    let mut series: Vec<Series> = names
        .into_iter()
        .enumerate()
        .map(|(i, name)| Series { name, color: colors[i % colors.len()], rows: Vec::new() })
        .collect();
    for (row, group) in group_of.into_iter().enumerate() {
        if let Some(g) = group {
            series[g].rows.push(row);
        }
    }
    Ok(series)
}

fn colors(spec: &ChartSpec) -> Vec<RGBColor> {
    let parsed: Vec<RGBColor> = spec.options.color_sequence.iter().filter_map(|c| parse_hex(c)).collect();
    if parsed.is_empty() {
        PALETTE.iter().filter_map(|c| parse_hex(c)).collect()
    } else {
        parsed
    }
}

/// Marker radius per row: the size channel mapped onto 3..=15 pixels, or 4.
fn marker_sizes(spec: &ChartSpec) -> Result<Vec<i32>> {
    let height = spec.data.height();
    let Some(size_field) = spec.encoding.get(Channel::Size) else {
        return Ok(vec![4; height]);
    };
    let cells = spec.data.cells(size_field)?;
    let max = cells.iter().filter_map(Cell::as_f64).fold(0.0_f64, f64::max);
    Ok(cells
        .iter()
        .map(|c| match c.as_f64() {
            Some(v) if max > 0.0 && v > 0.0 => 3 + (v / max * 12.0).round() as i32,
            _ => 3,
        })
        .collect())
}

fn padded_range(values: &[f64]) -> Range<f64> {
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !min.is_finite() || !max.is_finite() {
        return 0.0..1.0;
    }
    if min == max {
        (min - 1.0)..(max + 1.0)
    } else {
        let padding = (max - min) * 0.05;
        (min - padding)..(max + padding)
    }
}

/// `#rrggbb` to a color.
fn parse_hex(color: &str) -> Option<RGBColor> {
    let hex = color.strip_prefix('#')?;
    if hex.len() != 6 {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
    Some(RGBColor(channel(0)?, channel(2)?, channel(4)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::{build, Encoding};
    use crate::data::{Column, Table};

    fn bar_spec() -> ChartSpec {
        let table = Table::new(vec![
            Column::new("VIA_TRANSPORTE", vec![Cell::text("Aéreo"), Cell::text("Aéreo"), Cell::text("Marítimo")]),
            Column::new("REGIM", vec![Cell::text("10"), Cell::text("20"), Cell::text("10")]),
            Column::new("Cantidad", vec![Cell::Number(2.0), Cell::Number(1.0), Cell::Number(4.0)]),
        ])
        .unwrap();
        let enc = Encoding::new()
            .with(Channel::X, "VIA_TRANSPORTE")
            .with(Channel::Y, "Cantidad")
            .with(Channel::Color, "REGIM");
        build(table, ChartKind::Bar, enc).unwrap()
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("#1f77b4"), Some(RGBColor(0x1f, 0x77, 0xb4)));
        assert_eq!(parse_hex("blue"), None);
        assert_eq!(parse_hex("#12345"), None);
    }

    #[test]
    fn test_categories_first_occurrence() {
        let cells = [Cell::text("b"), Cell::Null, Cell::text("a"), Cell::text("b")];
        let (labels, rows) = categories(&cells);
        assert_eq!(labels, vec!["b", "a"]);
        assert_eq!(rows, vec![Some(0), None, Some(1), Some(0)]);
    }

    #[test]
    fn test_series_split_by_text_color() {
        let spec = bar_spec();
        let series = series_for(&spec, "Cantidad").unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].name, "10");
        assert_eq!(series[0].rows, vec![0, 2]);
        assert_eq!(series[1].rows, vec![1]);
    }

    #[test]
    fn test_unsupported_kind() {
        let table = Table::new(vec![
            Column::new("COD_PAI4", vec![Cell::text("PER")]),
            Column::new("PNK", vec![Cell::Number(1.0)]),
        ])
        .unwrap();
        let enc = Encoding::new().with(Channel::Locations, "COD_PAI4").with(Channel::Color, "PNK");
        let spec = build(table, ChartKind::Choropleth, enc).unwrap();
        let err = render_png(&spec, 100, 100).unwrap_err();
        assert!(matches!(err.downcast_ref::<DashboardError>(), Some(DashboardError::Render(_))));
    }

    #[test]
    fn test_padded_range() {
        assert_eq!(padded_range(&[5.0, 5.0]), 4.0..6.0);
        assert_eq!(padded_range(&[0.0, 10.0]), -0.5..10.5);
        assert_eq!(padded_range(&[]), 0.0..1.0);
    }
}
