//! Loading the field table from disk.

use i2o_common::{DatasetLayout, FieldTable, I2oError, StaticFieldTable};
use std::io::Write;

#[test]
fn test_load_field_table_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
fields:
  - name: prec
    display_name: Precipitation
    units: m
    color_min: 0.0
    color_max: 0.1
    source_variable: prec
    layout: static
    grid: {{ nx: 1810, ny: 900 }}
"#
    )
    .unwrap();

    let table = StaticFieldTable::load(file.path()).unwrap();
    let prec = table.get("prec").unwrap();
    assert_eq!(prec.display_name, "Precipitation");
    assert_eq!(prec.layout, DatasetLayout::Static);
    assert_eq!(prec.grid.unwrap().cells(), 1810 * 900);
}

#[test]
fn test_missing_file_is_internal_error() {
    let err = StaticFieldTable::load("/definitely/not/here/fields.yaml").unwrap_err();
    assert!(matches!(err, I2oError::Internal(_)));
}

#[test]
fn test_malformed_table_is_rejected() {
    let err = StaticFieldTable::from_yaml_str("fields: [ { name: 3 } ]").unwrap_err();
    assert!(matches!(err, I2oError::Internal(_)));
}
