//! Common fixtures for ice2ocean tests.

use i2o_common::{DatasetLayout, FieldDescriptor, GridShape, RequestParams, StaticFieldTable};

/// Container names used by the services.
pub mod containers {
    pub const RESULTS: &str = "ice2oceans";
    pub const MODEL: &str = "snowmodel";
    pub const UPLOADS: &str = "uploads";
    pub const PRODUCTS: &str = "products";
}

/// Field table YAML with one static and one dated parameter.
pub const FIELD_TABLE_YAML: &str = r#"
fields:
  - name: roff
    display_name: Runoff
    units: m
    colormap: blues
    color_min: 0.0
    color_max: 0.05
    source_variable: roff
    layout: static
    grid: { nx: 6, ny: 4 }
  - name: swe
    display_name: Snow water equivalent
    units: m
    color_min: 0.0
    color_max: 2.5
    source_variable: swed
"#;

/// Static parameter descriptor on a small grid.
pub fn static_field(name: &str, nx: usize, ny: usize) -> FieldDescriptor {
    FieldDescriptor {
        name: name.to_string(),
        display_name: name.to_uppercase(),
        units: "m".to_string(),
        colormap: "binary".to_string(),
        color_min: 0.0,
        color_max: 0.05,
        source_variable: name.to_string(),
        layout: DatasetLayout::Static,
        grid: Some(GridShape { nx, ny }),
        x_variable: "lon".to_string(),
        y_variable: "lat".to_string(),
    }
}

pub fn field_table() -> StaticFieldTable {
    StaticFieldTable::new([static_field("roff", 6, 4), static_field("prec", 6, 4)])
}

/// `{param: roff, year: 2014, month: 3, day: 10}` in insertion order.
pub fn roff_params() -> RequestParams {
    RequestParams::from_query([
        ("param", "roff"),
        ("year", "2014"),
        ("month", "3"),
        ("day", "10"),
    ])
}

/// The same parameters as [`roff_params`], inserted in a different order.
pub fn roff_params_permuted() -> RequestParams {
    RequestParams::from_query([
        ("year", "2014"),
        ("day", "10"),
        ("param", "roff"),
        ("month", "3"),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use i2o_common::FieldTable;

    #[test]
    fn test_yaml_fixture_parses() {
        let table = StaticFieldTable::from_yaml_str(FIELD_TABLE_YAML).unwrap();
        assert_eq!(table.all().len(), 2);
    }

    #[test]
    fn test_permuted_params_are_equal() {
        assert_eq!(roff_params(), roff_params_permuted());
    }
}
