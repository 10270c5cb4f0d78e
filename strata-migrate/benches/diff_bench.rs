//! Model diffing benchmarks.
//!
//! ```bash
//! cargo bench -p strata-migrate --bench diff_bench
//! ```

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use strata_migrate::{Differ, apply_operations, diff};
use strata_schema::{Column, ColumnType, Constraint, Index, Snapshot, Table};

fn model(tables: usize, columns: usize) -> Snapshot {
    let mut snapshot = Snapshot::new();
    for t in 0..tables {
        let name = format!("table_{t}");
        let mut table = Table::new(&name)
            .column(Column::new("id", ColumnType::BigInt))
            .constraint(Constraint::primary_key(format!("{name}_pkey"), ["id"]));
        for c in 0..columns {
            table = table.column(Column::new(format!("col_{c}"), ColumnType::Text).nullable());
        }
        table = table.index(Index::new(format!("idx_{name}_col_0"), ["col_0"]));
        if t > 0 {
            table = table
                .column(Column::new("parent_id", ColumnType::BigInt))
                .constraint(Constraint::foreign_key(
                    format!("{name}_parent_fk"),
                    ["parent_id"],
                    format!("table_{}", t - 1),
                    ["id"],
                ));
        }
        snapshot = snapshot.with_table(table);
    }
    snapshot
}

/// Every other table gains a column and loses its index.
fn changed(base: &Snapshot) -> Snapshot {
    let mut snapshot = base.clone();
    let names: Vec<String> = snapshot.tables().map(|t| t.name().to_string()).collect();
    for (i, name) in names.iter().enumerate().filter(|(i, _)| i % 2 == 0) {
        if let Some(table) = snapshot.table_mut(name) {
            let _ = table.add_column(Column::new(format!("extra_{i}"), ColumnType::Integer).nullable());
            table.remove_index(&format!("idx_{name}_col_0"));
        }
    }
    snapshot
}

fn bench_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff");

    for tables in [10, 50, 200] {
        let previous = model(tables, 20);
        let current = changed(&previous);

        group.bench_with_input(BenchmarkId::new("identical", tables), &previous, |b, s| {
            b.iter(|| diff(black_box(s), black_box(s)))
        });
        group.bench_with_input(
            BenchmarkId::new("from_empty", tables),
            &previous,
            |b, s| b.iter(|| diff(black_box(&Snapshot::new()), black_box(s))),
        );
        group.bench_with_input(
            BenchmarkId::new("changed", tables),
            &(previous.clone(), current.clone()),
            |b, (p, c)| b.iter(|| Differ::new().diff(black_box(p), black_box(c))),
        );
    }

    group.finish();
}

fn bench_replay(c: &mut Criterion) {
    let previous = model(50, 20);
    let current = changed(&previous);
    let Ok(diff) = diff(&previous, &current) else {
        return;
    };

    c.bench_function("replay_up_50", |b| {
        b.iter(|| apply_operations(black_box(&previous), black_box(&diff.up)))
    });
}

criterion_group!(benches, bench_diff, bench_replay);
criterion_main!(benches);
