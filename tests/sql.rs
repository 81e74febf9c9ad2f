//! End-to-end SQL tests over a scratch database directory.

use minidb::record::{INLINE_TEXT_CAPACITY, OVERFLOW_CAPACITY};
use minidb::session::{ResultSet, Session};
use minidb::value::Value;
use minidb::DbError;

fn session() -> (tempfile::TempDir, Session) {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let session = Session::open(dir.path()).unwrap();
    (dir, session)
}

fn rows(result: &ResultSet) -> Vec<Vec<String>> {
    result.display_rows()
}

fn ints(result: &ResultSet) -> Vec<Vec<i32>> {
    result
        .rows
        .iter()
        .map(|r| r.iter().map(|v| v.get_int()).collect())
        .collect()
}

fn sorted(mut v: Vec<Vec<i32>>) -> Vec<Vec<i32>> {
    v.sort();
    v
}

#[test]
fn insert_select_round_trip() {
    let (_dir, s) = session();
    s.execute_sql("CREATE TABLE t(id INT, name CHAR(8), w FLOAT, d DATE)").unwrap();
    s.execute_sql("INSERT INTO t VALUES (1, 'ann', 1.5, '2024-02-29'), (2, 'bob', -2.25, '1999-12-31')")
        .unwrap();
    let r = s.execute_one("SELECT * FROM t").unwrap();
    assert_eq!(r.headers, vec!["id", "name", "w", "d"]);
    let mut got = rows(&r);
    got.sort();
    assert_eq!(
        got,
        vec![
            vec!["1", "ann", "1.5", "2024-02-29"],
            vec!["2", "bob", "-2.25", "1999-12-31"],
        ]
    );
}

#[test]
fn where_and_arithmetic() {
    let (_dir, s) = session();
    s.execute_sql("CREATE TABLE t(id INT, v INT)").unwrap();
    s.execute_sql("INSERT INTO t VALUES (1,10),(2,20),(3,30)").unwrap();
    let r = s.execute_one("SELECT id, v*2 FROM t WHERE v > 10 AND v <= 30").unwrap();
    assert_eq!(sorted(ints(&r)), vec![vec![2, 40], vec![3, 60]]);
    // Division result is FLOAT; division by zero is NULL.
    let r = s.execute_one("SELECT v/4 FROM t WHERE id = 1").unwrap();
    assert_eq!(rows(&r), vec![vec!["2.5"]]);
    let r = s.execute_one("SELECT v/0 FROM t WHERE id = 1").unwrap();
    assert_eq!(rows(&r), vec![vec!["NULL"]]);
}

#[test]
fn scalar_aggregate_on_empty_filter_is_null() {
    let (_dir, s) = session();
    s.execute_sql("CREATE TABLE t(id INT, v INT)").unwrap();
    s.execute_sql("INSERT INTO t VALUES (1,10),(2,20)").unwrap();
    let r = s.execute_one("SELECT SUM(v) FROM t WHERE id=3").unwrap();
    assert_eq!(r.rows.len(), 1);
    assert!(r.rows[0][0].is_null());
    // COUNT on the same empty group is 0.
    let r = s.execute_one("SELECT COUNT(*), COUNT(v), SUM(v), AVG(v), MAX(v), MIN(v) FROM t WHERE id=3").unwrap();
    assert_eq!(r.rows[0][0], Value::Int(0));
    assert_eq!(r.rows[0][1], Value::Int(0));
    for c in 2..6 {
        assert!(r.rows[0][c].is_null(), "column {c} should be NULL");
    }
}

#[test]
fn aggregates_skip_nulls() {
    let (_dir, s) = session();
    s.execute_sql("CREATE TABLE t(id INT, v INT)").unwrap();
    s.execute_sql("INSERT INTO t VALUES (1,NULL),(2,NULL),(3,6),(4,2)").unwrap();
    let r = s.execute_one("SELECT COUNT(*), COUNT(v), SUM(v), AVG(v), MIN(v), MAX(v) FROM t").unwrap();
    assert_eq!(
        rows(&r),
        vec![vec!["4".to_string(), "2".into(), "8".into(), "4".into(), "2".into(), "6".into()]]
    );
    // All-NULL input: aggregates yield NULL.
    s.execute_sql("CREATE TABLE n(v INT)").unwrap();
    s.execute_sql("INSERT INTO n VALUES (NULL),(NULL)").unwrap();
    let r = s.execute_one("SELECT SUM(v), AVG(v), MAX(v), MIN(v), COUNT(v) FROM n").unwrap();
    for c in 0..4 {
        assert!(r.rows[0][c].is_null());
    }
    assert_eq!(r.rows[0][4], Value::Int(0));
}

#[test]
fn group_by_and_having() {
    let (_dir, s) = session();
    s.execute_sql("CREATE TABLE t(g INT, v INT)").unwrap();
    s.execute_sql("INSERT INTO t VALUES (1,10),(1,20),(2,5),(2,NULL),(3,NULL)").unwrap();
    let r = s.execute_one("SELECT g, SUM(v), COUNT(*) FROM t GROUP BY g").unwrap();
    let mut got = rows(&r);
    got.sort();
    assert_eq!(
        got,
        vec![
            vec!["1", "30", "2"],
            vec!["2", "5", "2"],
            vec!["3", "NULL", "1"],
        ]
    );
    let r = s.execute_one("SELECT g, SUM(v) FROM t GROUP BY g HAVING SUM(v) > 10").unwrap();
    assert_eq!(rows(&r), vec![vec!["1", "30"]]);
    // Bare column outside GROUP BY is rejected.
    let err = s.execute_one("SELECT v FROM t GROUP BY g").unwrap_err();
    assert!(matches!(err, DbError::InvalidArgument(_)));
}

#[test]
fn join_correctness_and_hash_join_choice() {
    let (_dir, s) = session();
    s.execute_sql("CREATE TABLE a(x INT, k INT)").unwrap();
    s.execute_sql("CREATE TABLE b(y INT, k INT)").unwrap();
    s.execute_sql("INSERT INTO a VALUES (1,1),(2,2),(3,3),(4,NULL)").unwrap();
    s.execute_sql("INSERT INTO b VALUES (10,1),(20,2),(21,2),(30,NULL)").unwrap();

    let expected = vec![vec![1, 10], vec![2, 20], vec![2, 21]];
    let r = s.execute_one("SELECT a.x, b.y FROM a JOIN b ON a.k = b.k").unwrap();
    assert_eq!(sorted(ints(&r)), expected);

    // Plans: NLJ by default, hash join once enabled, NLJ again for non-equi.
    let plan = s.execute_one("EXPLAIN SELECT a.x, b.y FROM a JOIN b ON a.k = b.k").unwrap();
    let text = plan.rows[0][0].get_string();
    assert!(text.contains("NESTED_LOOP_JOIN"), "plan was:\n{text}");

    s.execute_sql("SET hash_join_on = 1").unwrap();
    let plan = s.execute_one("EXPLAIN SELECT a.x, b.y FROM a JOIN b ON a.k = b.k").unwrap();
    let text = plan.rows[0][0].get_string();
    assert!(text.contains("HASH_JOIN"), "plan was:\n{text}");
    let r = s.execute_one("SELECT a.x, b.y FROM a JOIN b ON a.k = b.k").unwrap();
    assert_eq!(sorted(ints(&r)), expected);

    let plan = s.execute_one("EXPLAIN SELECT a.x, b.y FROM a JOIN b ON a.k < b.k").unwrap();
    let text = plan.rows[0][0].get_string();
    assert!(text.contains("NESTED_LOOP_JOIN"), "plan was:\n{text}");
}

#[test]
fn predicate_pushdown_eliminates_predicate_node() {
    let (_dir, s) = session();
    s.execute_sql("CREATE TABLE a(x INT, y INT)").unwrap();
    s.execute_sql("CREATE TABLE b(y INT, z INT)").unwrap();
    s.execute_sql("INSERT INTO a VALUES (1,1),(1,2),(2,2)").unwrap();
    s.execute_sql("INSERT INTO b VALUES (1,100),(2,200)").unwrap();

    let plan = s
        .execute_one("EXPLAIN SELECT * FROM a, b WHERE a.x = 1 AND a.y = b.y")
        .unwrap();
    let text = plan.rows[0][0].get_string();
    assert!(!text.contains("PREDICATE"), "plan was:\n{text}");
    assert!(text.contains("NESTED_LOOP_JOIN(a.y=b.y)"), "plan was:\n{text}");

    let r = s.execute_one("SELECT * FROM a, b WHERE a.x = 1 AND a.y = b.y").unwrap();
    assert_eq!(sorted(ints(&r)), vec![vec![1, 1, 1, 100], vec![1, 2, 2, 200]]);
}

#[test]
fn unique_index_with_nulls() {
    let (_dir, s) = session();
    s.execute_sql("CREATE TABLE u(a INT, b INT)").unwrap();
    s.execute_sql("CREATE UNIQUE INDEX i ON u(a)").unwrap();
    // Multiple NULL keys coexist under a unique index.
    s.execute_sql("INSERT INTO u VALUES (NULL,1)").unwrap();
    s.execute_sql("INSERT INTO u VALUES (NULL,2)").unwrap();
    s.execute_sql("INSERT INTO u VALUES (1,3)").unwrap();
    let err = s.execute_sql("INSERT INTO u VALUES (1,4)").unwrap_err();
    assert!(matches!(err, DbError::RecordDuplicateKey), "got {err:?}");
    // The failed insert left nothing behind.
    let r = s.execute_one("SELECT b FROM u").unwrap();
    assert_eq!(sorted(ints(&r)), vec![vec![1], vec![2], vec![3]]);
}

#[test]
fn index_scan_equivalence_and_composite_prefix() {
    let (_dir, s) = session();
    s.execute_sql("CREATE TABLE c(a INT, b INT, c INT)").unwrap();
    for a in 0..5 {
        for b in 0..4 {
            s.execute_sql(&format!("INSERT INTO c VALUES ({a},{b},{})", a * 10 + b)).unwrap();
        }
    }
    let before = sorted(ints(&s.execute_one("SELECT * FROM c WHERE a=1 AND b=2").unwrap()));

    s.execute_sql("CREATE INDEX i ON c(a,b,c)").unwrap();
    let plan = s.execute_one("EXPLAIN SELECT * FROM c WHERE a=1 AND b=2").unwrap();
    let text = plan.rows[0][0].get_string();
    assert!(text.contains("INDEX_SCAN(i ON c)"), "plan was:\n{text}");

    let after = sorted(ints(&s.execute_one("SELECT * FROM c WHERE a=1 AND b=2").unwrap()));
    assert_eq!(before, after);
    assert_eq!(after, vec![vec![1, 2, 12]]);

    // A non-prefix condition cannot use the index.
    let plan = s.execute_one("EXPLAIN SELECT * FROM c WHERE b=2").unwrap();
    let text = plan.rows[0][0].get_string();
    assert!(text.contains("TABLE_SCAN"), "plan was:\n{text}");
}

#[test]
fn index_maintained_by_update_and_delete() {
    let (_dir, s) = session();
    s.execute_sql("CREATE TABLE t(id INT, v INT)").unwrap();
    s.execute_sql("CREATE INDEX iv ON t(v)").unwrap();
    s.execute_sql("INSERT INTO t VALUES (1,10),(2,20),(3,30)").unwrap();
    s.execute_sql("UPDATE t SET v = 25 WHERE id = 2").unwrap();
    let r = s.execute_one("SELECT id FROM t WHERE v = 25").unwrap();
    assert_eq!(ints(&r), vec![vec![2]]);
    let r = s.execute_one("SELECT id FROM t WHERE v = 20").unwrap();
    assert!(r.rows.is_empty());
    s.execute_sql("DELETE FROM t WHERE v = 25").unwrap();
    let r = s.execute_one("SELECT id FROM t WHERE v = 25").unwrap();
    assert!(r.rows.is_empty());
    let r = s.execute_one("SELECT COUNT(*) FROM t").unwrap();
    assert_eq!(r.rows[0][0], Value::Int(2));
}

#[test]
fn text_overflow_round_trip() {
    let (_dir, s) = session();
    s.execute_sql("CREATE TABLE x(id INT, body TEXT)").unwrap();
    for (id, len) in [(1, 0usize), (2, 1), (3, INLINE_TEXT_CAPACITY), (4, INLINE_TEXT_CAPACITY + 1), (5, 5000)] {
        let body: String = (0..len).map(|i| (b'a' + (i % 26) as u8) as char).collect();
        s.execute_sql(&format!("INSERT INTO x VALUES ({id}, '{body}')")).unwrap();
    }
    for (id, len) in [(1, 0usize), (2, 1), (3, INLINE_TEXT_CAPACITY), (4, INLINE_TEXT_CAPACITY + 1), (5, 5000)] {
        let r = s.execute_one(&format!("SELECT body FROM x WHERE id = {id}")).unwrap();
        let got = r.rows[0][0].get_string();
        assert_eq!(got.len(), len, "length mismatch for id {id}");
        let expect: String = (0..len).map(|i| (b'a' + (i % 26) as u8) as char).collect();
        assert_eq!(got, expect);
    }

    // The overflow page law: ceil((L - inline) / capacity) pages per text.
    let table = s.db().find_table("x").unwrap();
    let expected: usize = [0usize, 1, INLINE_TEXT_CAPACITY, INLINE_TEXT_CAPACITY + 1, 5000]
        .iter()
        .map(|&l| l.saturating_sub(INLINE_TEXT_CAPACITY).div_ceil(OVERFLOW_CAPACITY))
        .sum();
    assert_eq!(table.handler().overflow_page_count(), expected);

    // Deleting releases the chains.
    s.execute_sql("DELETE FROM x WHERE id = 5").unwrap();
    assert_eq!(table.handler().overflow_page_count(), expected - 1);
}

#[test]
fn text_update_rebuilds_overflow() {
    let (_dir, s) = session();
    s.execute_sql("CREATE TABLE x(id INT, body TEXT)").unwrap();
    s.execute_sql("INSERT INTO x VALUES (1, 'short')").unwrap();
    let long: String = std::iter::repeat("xyz").take(2000).collect::<String>();
    s.execute_sql(&format!("UPDATE x SET body = '{long}' WHERE id = 1")).unwrap();
    let r = s.execute_one("SELECT body FROM x WHERE id = 1").unwrap();
    assert_eq!(r.rows[0][0].get_string(), long);
    s.execute_sql("UPDATE x SET body = 'tiny' WHERE id = 1").unwrap();
    let r = s.execute_one("SELECT body FROM x WHERE id = 1").unwrap();
    assert_eq!(r.rows[0][0].get_string(), "tiny");
    let table = s.db().find_table("x").unwrap();
    assert_eq!(table.handler().overflow_page_count(), 0);
}

#[test]
fn vectors_and_distance_functions() {
    let (_dir, s) = session();
    s.execute_sql("CREATE TABLE e(id INT, v VECTOR(3))").unwrap();
    s.execute_sql("INSERT INTO e VALUES (1, [1,2,3]), (2, [4,5,6])").unwrap();
    let r = s.execute_one("SELECT v FROM e WHERE id = 1").unwrap();
    assert_eq!(rows(&r), vec![vec!["[1,2,3]"]]);

    let r = s.execute_one("SELECT l2_distance(v, [1,2,3]) FROM e WHERE id = 1").unwrap();
    assert_eq!(r.rows[0][0], Value::Float(0.0));
    let r = s.execute_one("SELECT inner_product(v, [1,0,0]) FROM e WHERE id = 2").unwrap();
    assert_eq!(r.rows[0][0], Value::Float(4.0));
    let r = s.execute_one("SELECT cosine_distance([0,0,0], v) FROM e WHERE id = 1").unwrap();
    assert_eq!(r.rows[0][0], Value::Float(1.0));

    // Element-wise arithmetic in CALC.
    let r = s.execute_one("CALC [1,2,3] + [4,5,6], [4,5,6] - [1,2,3], [1,2,3] * [2,2,2]").unwrap();
    assert_eq!(rows(&r), vec![vec!["[5,7,9]", "[3,3,3]", "[2,4,6]"]]);
    // Dimension mismatch is an error.
    let err = s.execute_one("CALC [1,2] + [1,2,3]").unwrap_err();
    assert!(matches!(err, DbError::InvalidArgument(_)));
}

#[test]
fn dates_validate_and_compare() {
    let (_dir, s) = session();
    s.execute_sql("CREATE TABLE d(id INT, day DATE)").unwrap();
    s.execute_sql("INSERT INTO d VALUES (1, '2024-01-31'), (2, '2024-02-29')").unwrap();
    let err = s.execute_sql("INSERT INTO d VALUES (3, '2023-02-29')").unwrap_err();
    assert!(matches!(err, DbError::InvalidArgument(_)));
    let r = s.execute_one("SELECT id FROM d WHERE day > '2024-02-01'").unwrap();
    assert_eq!(ints(&r), vec![vec![2]]);
}

#[test]
fn null_semantics_in_where() {
    let (_dir, s) = session();
    s.execute_sql("CREATE TABLE t(id INT, v INT)").unwrap();
    s.execute_sql("INSERT INTO t VALUES (1,NULL),(2,5)").unwrap();
    // Comparison with NULL is never true.
    let r = s.execute_one("SELECT id FROM t WHERE v = 5").unwrap();
    assert_eq!(ints(&r), vec![vec![2]]);
    let r = s.execute_one("SELECT id FROM t WHERE v <> 5").unwrap();
    assert!(r.rows.is_empty());
    let r = s.execute_one("SELECT id FROM t WHERE v IS NULL").unwrap();
    assert_eq!(ints(&r), vec![vec![1]]);
    let r = s.execute_one("SELECT id FROM t WHERE v IS NOT NULL").unwrap();
    assert_eq!(ints(&r), vec![vec![2]]);
    // NULL into NOT NULL column.
    s.execute_sql("CREATE TABLE nn(a INT NOT NULL)").unwrap();
    let err = s.execute_sql("INSERT INTO nn VALUES (NULL)").unwrap_err();
    assert!(matches!(err, DbError::ConstraintViolation(_)));
}

#[test]
fn in_exists_and_scalar_subqueries() {
    let (_dir, s) = session();
    s.execute_sql("CREATE TABLE t1(id INT, v INT)").unwrap();
    s.execute_sql("CREATE TABLE t2(x INT)").unwrap();
    s.execute_sql("INSERT INTO t1 VALUES (1,10),(2,20),(3,30)").unwrap();
    s.execute_sql("INSERT INTO t2 VALUES (1),(3)").unwrap();

    let r = s.execute_one("SELECT id FROM t1 WHERE id IN (SELECT x FROM t2)").unwrap();
    assert_eq!(sorted(ints(&r)), vec![vec![1], vec![3]]);
    let r = s.execute_one("SELECT id FROM t1 WHERE id NOT IN (SELECT x FROM t2)").unwrap();
    assert_eq!(sorted(ints(&r)), vec![vec![2]]);
    let r = s.execute_one("SELECT id FROM t1 WHERE id IN (2, 3)").unwrap();
    assert_eq!(sorted(ints(&r)), vec![vec![2], vec![3]]);
    let r = s.execute_one("SELECT id FROM t1 WHERE EXISTS (SELECT * FROM t2)").unwrap();
    assert_eq!(r.rows.len(), 3);
    s.execute_sql("DELETE FROM t2 WHERE x > 0").unwrap();
    let r = s.execute_one("SELECT id FROM t1 WHERE NOT EXISTS (SELECT * FROM t2)").unwrap();
    assert_eq!(r.rows.len(), 3);

    // Scalar subquery with an aggregate goes through the full pipeline.
    s.execute_sql("INSERT INTO t2 VALUES (25)").unwrap();
    let r = s.execute_one("SELECT id FROM t1 WHERE v > (SELECT MAX(x) FROM t2)").unwrap();
    assert_eq!(sorted(ints(&r)), vec![vec![3]]);
}

#[test]
fn calc_and_select_without_from() {
    let (_dir, s) = session();
    let r = s.execute_one("CALC 1+2*3, 10/4, -5").unwrap();
    assert_eq!(rows(&r), vec![vec!["7", "2.5", "-5"]]);
    let r = s.execute_one("SELECT 'hello world'").unwrap();
    assert_eq!(rows(&r), vec![vec!["hello world"]]);
}

#[test]
fn ddl_and_utility_statements() {
    let (_dir, s) = session();
    s.execute_sql("CREATE TABLE t(a INT, b CHAR(4))").unwrap();
    s.execute_sql("CREATE TABLE u(c INT)").unwrap();
    let r = s.execute_one("SHOW TABLES").unwrap();
    assert_eq!(rows(&r), vec![vec!["t"], vec!["u"]]);

    s.execute_sql("CREATE UNIQUE INDEX ia ON t(a); CREATE INDEX iab ON t(a, b)").unwrap();
    let r = s.execute_one("SHOW INDEX FROM t").unwrap();
    assert_eq!(
        r.headers,
        vec!["Table", "Non_unique", "Key_name", "Seq_in_index", "Column_name"]
    );
    assert_eq!(
        rows(&r),
        vec![
            vec!["t", "0", "ia", "1", "a"],
            vec!["t", "1", "iab", "1", "a"],
            vec!["t", "1", "iab", "2", "b"],
        ]
    );

    let r = s.execute_one("DESC t").unwrap();
    assert_eq!(
        rows(&r),
        vec![
            vec!["a", "ints", "4", "yes"],
            vec!["b", "chars", "4", "yes"],
        ]
    );

    s.execute_sql("DROP INDEX iab ON t").unwrap();
    let r = s.execute_one("SHOW INDEX FROM t").unwrap();
    assert_eq!(r.rows.len(), 1);

    s.execute_sql("DROP TABLE u").unwrap();
    let r = s.execute_one("SHOW TABLES").unwrap();
    assert_eq!(rows(&r), vec![vec!["t"]]);
    let err = s.execute_sql("SELECT * FROM u").unwrap_err();
    assert!(matches!(err, DbError::TableNotExist(_)));

    s.execute_sql("BEGIN; COMMIT; ROLLBACK").unwrap();
    s.execute_sql("ANALYZE TABLE t").unwrap();
    s.execute_sql("HELP").unwrap();
}

#[test]
fn load_data_infile() {
    let (dir, s) = session();
    s.execute_sql("CREATE TABLE t(id INT, name CHAR(8), w FLOAT)").unwrap();
    let path = dir.path().join("rows.txt");
    std::fs::write(&path, "1|ann|1.5\n2|bob|2.5\n3|NULL|0.5\n").unwrap();
    let r = s
        .execute_one(&format!("LOAD DATA INFILE '{}' INTO TABLE t", path.display()))
        .unwrap();
    assert_eq!(r.rows.len(), 1);
    let r = s.execute_one("SELECT COUNT(*) FROM t").unwrap();
    assert_eq!(r.rows[0][0], Value::Int(3));
    let r = s.execute_one("SELECT id FROM t WHERE name IS NULL").unwrap();
    assert_eq!(ints(&r), vec![vec![3]]);
}

#[test]
fn persistence_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let s = Session::open(dir.path()).unwrap();
        s.execute_sql("CREATE TABLE t(id INT, name CHAR(12))").unwrap();
        s.execute_sql("CREATE UNIQUE INDEX i ON t(id)").unwrap();
        s.execute_sql("INSERT INTO t VALUES (1,'one'),(2,'two')").unwrap();
    }
    let s = Session::open(dir.path()).unwrap();
    let r = s.execute_one("SELECT name FROM t WHERE id = 2").unwrap();
    assert_eq!(r.rows[0][0].get_string(), "two");
    // The reopened unique index still enforces uniqueness.
    let err = s.execute_sql("INSERT INTO t VALUES (2,'again')").unwrap_err();
    assert!(matches!(err, DbError::RecordDuplicateKey));
}

#[test]
fn scan_completeness_after_churn() {
    let (_dir, s) = session();
    s.execute_sql("CREATE TABLE t(id INT)").unwrap();
    for i in 0..500 {
        s.execute_sql(&format!("INSERT INTO t VALUES ({i})")).unwrap();
    }
    s.execute_sql("DELETE FROM t WHERE id >= 100 AND id < 200").unwrap();
    let r = s.execute_one("SELECT COUNT(*) FROM t").unwrap();
    assert_eq!(r.rows[0][0], Value::Int(400));
    let r = s.execute_one("SELECT id FROM t WHERE id < 3").unwrap();
    assert_eq!(sorted(ints(&r)), vec![vec![0], vec![1], vec![2]]);
    // Freed slots get reused without duplicating scans.
    for i in 0..50 {
        s.execute_sql(&format!("INSERT INTO t VALUES ({})", 1000 + i)).unwrap();
    }
    let r = s.execute_one("SELECT COUNT(*) FROM t").unwrap();
    assert_eq!(r.rows[0][0], Value::Int(450));
}

#[test]
fn update_multiple_columns_and_cast() {
    let (_dir, s) = session();
    s.execute_sql("CREATE TABLE t(id INT, v INT, w FLOAT)").unwrap();
    s.execute_sql("INSERT INTO t VALUES (1,10,1.0),(2,20,2.0)").unwrap();
    s.execute_sql("UPDATE t SET v = v + 1, w = v WHERE id = 1").unwrap();
    let r = s.execute_one("SELECT v, w FROM t WHERE id = 1").unwrap();
    // Both right-hand sides see the pre-update row.
    assert_eq!(rows(&r), vec![vec!["11", "10"]]);
    // Unknown or duplicate targets are rejected at bind time.
    assert!(s.execute_sql("UPDATE t SET nope = 1").is_err());
    assert!(s.execute_sql("UPDATE t SET v = 1, v = 2").is_err());
}

#[test]
fn vectorised_engine_matches_row_engine() {
    let (_dir, s) = session();
    s.execute_sql("CREATE TABLE t(g INT, v INT)").unwrap();
    s.execute_sql("INSERT INTO t VALUES (1,10),(1,20),(2,5),(2,7),(3,NULL)").unwrap();

    let row = s.execute_one("SELECT g, SUM(v) FROM t GROUP BY g").unwrap();
    let vec = s.execute_sql_vec("SELECT g, SUM(v) FROM t GROUP BY g").unwrap();
    assert_eq!(sorted(ints(&row)), sorted(ints(&vec)));

    let row = s.execute_one("SELECT SUM(v), COUNT(*) FROM t").unwrap();
    let vec = s.execute_sql_vec("SELECT SUM(v), COUNT(*) FROM t").unwrap();
    assert_eq!(ints(&row), ints(&vec));

    let row = s.execute_one("SELECT v FROM t WHERE v > 6").unwrap();
    let vec = s.execute_sql_vec("SELECT v FROM t WHERE v > 6").unwrap();
    assert_eq!(sorted(ints(&row)), sorted(ints(&vec)));
}

#[test]
fn char_cross_type_comparisons() {
    let (_dir, s) = session();
    s.execute_sql("CREATE TABLE t(id INT, name CHAR(8))").unwrap();
    s.execute_sql("INSERT INTO t VALUES (5,'5'),(7,'seven')").unwrap();
    // CHAR against a numeric coerces the CHAR side.
    let r = s.execute_one("SELECT id FROM t WHERE name = 5").unwrap();
    assert_eq!(ints(&r), vec![vec![5]]);
    // Unparsable strings coerce to 0, MySQL style.
    let r = s.execute_one("SELECT id FROM t WHERE name = 0").unwrap();
    assert_eq!(ints(&r), vec![vec![7]]);
}

#[test]
fn syntax_errors_carry_position() {
    let (_dir, s) = session();
    let err = s.execute_sql("SELEC * FROM t").unwrap_err();
    let DbError::SqlSyntax { line, .. } = err else { panic!("got {err:?}") };
    assert_eq!(line, 1);
}
