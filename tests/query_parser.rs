use datasource_bridge::query::parser::{extract_table_name, normalize_query};

#[test]
fn plain_queries_are_untouched() {
    for q in [
        "some_table",
        "some named query",
        "SELECT col1, col2 FROM some_table",
        "SELECT col1, col2 FROM some_schema.some_table",
    ] {
        assert_eq!(normalize_query(q), q);
    }
}

#[test]
fn quoted_tables_collapse_to_their_names() {
    assert_eq!(normalize_query("SELECT `col1`, `col2` FROM `some_table`"), "some_table");
    assert_eq!(
        normalize_query("SELECT `col1`, `col2` FROM `some_schema`.`some_table`"),
        "some_table"
    );
    assert_eq!(normalize_query(r#"SELECT "col1", "col2" FROM "some_table""#), "some_table");
    assert_eq!(
        normalize_query(r#"SELECT "col1", "col2" FROM "some_schema"."some_table""#),
        "some_table"
    );
}

#[test]
fn embedded_queries_are_unwrapped() {
    let embedded = "select 1";
    for wrapped in [
        format!("SELECT `col1`, `col2` FROM `{embedded}`"),
        format!("SELECT `col1`, `col2` FROM `some_schema`.`{embedded}`"),
        format!(r#"SELECT "col1", "col2" FROM "{embedded}""#),
        format!(r#"SELECT "col1", "col2" FROM "some_schema"."{embedded}""#),
    ] {
        assert_eq!(normalize_query(&wrapped), embedded);
    }

    let embedded = "select 's' as s";
    assert_eq!(normalize_query(&format!("SELECT `s` FROM `{embedded}`")), embedded);
    assert_eq!(normalize_query(&format!("SELECT `s` FROM `{embedded}` WHERE `s` = 's'")), embedded);
}

#[test]
fn normalization_is_idempotent() {
    for q in [
        "some_table",
        "SELECT col1, col2 FROM some_schema.some_table",
        "SELECT `col1`, `col2` FROM `some_schema`.`select 1`",
        "SELECT \"col1\" FROM \"t\"",
        "select 's' as s",
    ] {
        let once = normalize_query(q);
        assert_eq!(normalize_query(&once), once, "not idempotent for: {q}");
    }
}

#[test]
fn table_names_are_extracted_with_quotes() {
    assert_eq!(extract_table_name(""), "");
    assert_eq!(extract_table_name("a"), "a");
    assert_eq!(extract_table_name("a.a"), "a.a");

    let table = "`schema`.`table`";
    assert_eq!(extract_table_name(&format!("SELECT * FROM {table}")), table);
    assert_eq!(extract_table_name(&format!("SELECT * from {table}")), table);
    assert_eq!(extract_table_name(&format!("SELECT * FROM  {table} where col1=11")), table);
    assert_eq!(extract_table_name(&format!("SELECT * FROM\r{table} where col1=11")), table);
    assert_eq!(
        extract_table_name(&format!("SELECT * FROM (select col1 from {table} where col1=11) a")),
        table
    );
    assert_eq!(
        extract_table_name(&format!(
            "SELECT col1, ' from b' as a FROM (select col1 from {table} where col1=11) a"
        )),
        table
    );
}
