// Explicit column set of the export dataset

use crate::data::Table;
use crate::error::{DashboardError, Result};

/// Calendar order of the month labels found in `MES_NOMBRE`.
pub const MONTHS: [&str; 12] = [
    "Enero", "Febrero", "Marzo", "Abril", "Mayo", "Junio",
    "Julio", "Agosto", "Septiembre", "Octubre", "Noviembre", "Diciembre",
];

/// Map a raw month label onto its canonical spelling, ignoring case and
/// surrounding whitespace.
pub fn canonical_month(label: &str) -> Option<&'static str> {
    let trimmed = label.trim();
    MONTHS.iter().copied().find(|m| m.eq_ignore_ascii_case(trimmed))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    CountryName,
    CountryIso3,
    Latitude,
    Longitude,
    Year,
    Month,
    FobMillions,
    NetWeightKg,
    UnitValue,
    TransportMode,
    CustomsRegime,
    CustomsOffice,
    TariffPosition,
}

impl Field {
    pub const ALL: [Field; 13] = [
        Field::CountryName,
        Field::CountryIso3,
        Field::Latitude,
        Field::Longitude,
        Field::Year,
        Field::Month,
        Field::FobMillions,
        Field::NetWeightKg,
        Field::UnitValue,
        Field::TransportMode,
        Field::CustomsRegime,
        Field::CustomsOffice,
        Field::TariffPosition,
    ];

    /// Column name in the source spreadsheet.
    pub const fn column(self) -> &'static str {
        match self {
            Field::CountryName => "NOMBRE_PAIS",
            Field::CountryIso3 => "COD_PAI4",
            Field::Latitude => "LATITUD",
            Field::Longitude => "LONGITUD",
            Field::Year => "FECH",
            Field::Month => "MES_NOMBRE",
            Field::FobMillions => "FOBDOL_MILLONES",
            Field::NetWeightKg => "PNK",
            Field::UnitValue => "VALOR_UNITARIO",
            Field::TransportMode => "VIA_TRANSPORTE",
            Field::CustomsRegime => "REGIM",
            Field::CustomsOffice => "ADUANA_NOMBRE",
            Field::TariffPosition => "POSAR",
        }
    }

    /// Axis/legend label shown to users.
    pub const fn label(self) -> &'static str {
        match self {
            Field::CountryName => "País",
            Field::CountryIso3 => "Código ISO-3",
            Field::Latitude => "Latitud",
            Field::Longitude => "Longitud",
            Field::Year => "Año",
            Field::Month => "Mes",
            Field::FobMillions => "Valor FOB (Millones USD)",
            Field::NetWeightKg => "Peso Neto (KG)",
            Field::UnitValue => "Valor Unitario (USD)",
            Field::TransportMode => "Medio de Transporte",
            Field::CustomsRegime => "Régimen",
            Field::CustomsOffice => "Departamento",
            Field::TariffPosition => "Posición Arancelaria",
        }
    }
}

/// Check that every schema column is present and rename matching headers to
/// their canonical spelling. Extra columns are kept untouched.
pub fn validate(table: Table) -> Result<Table> {
    let missing: Vec<String> = Field::ALL
        .iter()
        .filter(|f| !table.has_column(f.column()))
        .map(|f| f.column().to_string())
        .collect();
    if !missing.is_empty() {
        return Err(DashboardError::Schema(missing));
    }

    let mut table = table;
    for field in Field::ALL {
        let idx = table.column_index(field.column())?;
        let current = table.columns[idx].name.clone();
        if current != field.column() {
            table = table.rename_column(&current, field.column())?;
        }
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Cell, Column};

    fn full_table(rename: Option<(&str, &str)>) -> Table {
        let columns = Field::ALL
            .iter()
            .map(|f| {
                let name = match rename {
                    Some((from, to)) if from == f.column() => to.to_string(),
                    _ => f.column().to_string(),
                };
                Column::new(name, vec![Cell::Null])
            })
            .collect();
        Table::new(columns).unwrap()
    }

    #[test]
    fn test_canonical_month() {
        assert_eq!(canonical_month("  marzo "), Some("Marzo"));
        assert_eq!(canonical_month("DICIEMBRE"), Some("Diciembre"));
        assert_eq!(canonical_month("Marzzo"), None);
    }

    #[test]
    fn test_validate_accepts_full_schema() {
        let table = validate(full_table(None)).unwrap();
        assert_eq!(table.width(), Field::ALL.len());
    }

    #[test]
    fn test_validate_canonicalizes_header_case() {
        let table = validate(full_table(Some(("REGIM", "regim")))).unwrap();
        assert!(table.column_names().contains(&"REGIM"));
    }

    #[test]
    fn test_validate_reports_missing_columns() {
        let table = full_table(Some(("PNK", "PESO")));
        match validate(table) {
            Err(DashboardError::Schema(missing)) => assert_eq!(missing, vec!["PNK".to_string()]),
            other => panic!("Expected schema error, got {:?}", other),
        }
    }
}
