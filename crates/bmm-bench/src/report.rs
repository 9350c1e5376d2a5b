//! Human-readable output on stdout.

use std::io::{self, Write};
use std::time::Duration;

use crate::driver::BenchmarkResult;
use crate::strategy::Strategy;
use crate::workload::ParamTriple;

/// Prints results as they arrive, with a header line for every new cell.
pub struct Reporter<W: Write> {
    out: W,
    cell: Option<(usize, ParamTriple)>,
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W) -> Self {
        Reporter { out, cell: None }
    }

    pub fn result(&mut self, result: &BenchmarkResult) -> io::Result<()> {
        let cell = (result.batch, result.params);
        if self.cell != Some(cell) {
            let p = result.params;
            writeln!(self.out, "\nparam: [{}, {}, {}, {}]", result.batch, p.m, p.n, p.k)?;
            self.cell = Some(cell);
        }
        writeln!(self.out, "[{}]", result.strategy.label())?;
        writeln!(self.out, "Bare Metal Time {:.6}", result.bare_metal.as_secs_f64())?;
        writeln!(self.out, "Serverless Call Time: {:.6}", result.dispatch.as_secs_f64())?;
        writeln!(self.out, "Dispatch Overhead: {:.6}", result.overhead().as_secs_f64())?;
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Aggregate timings of one (strategy, batch size, triple) combination.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub strategy: Strategy,
    pub batch: usize,
    pub params: ParamTriple,
    pub runs: usize,
    pub mean_bare_metal: Duration,
    pub min_bare_metal: Duration,
    pub mean_dispatch: Duration,
    pub min_dispatch: Duration,
}

/// Group results by (strategy, batch, triple), in order of first appearance.
pub fn summarize(results: &[BenchmarkResult]) -> Vec<SummaryRow> {
    let mut groups: Vec<((Strategy, usize, ParamTriple), Vec<&BenchmarkResult>)> = Vec::new();
    for r in results {
        let key = (r.strategy, r.batch, r.params);
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(r),
            None => groups.push((key, vec![r])),
        }
    }

    groups
        .into_iter()
        .map(|((strategy, batch, params), members)| {
            let runs = members.len();
            let bare: Vec<Duration> = members.iter().map(|r| r.bare_metal).collect();
            let dispatch: Vec<Duration> = members.iter().map(|r| r.dispatch).collect();
            SummaryRow {
                strategy,
                batch,
                params,
                runs,
                mean_bare_metal: mean(&bare),
                min_bare_metal: bare.iter().copied().min().unwrap_or_default(),
                mean_dispatch: mean(&dispatch),
                min_dispatch: dispatch.iter().copied().min().unwrap_or_default(),
            }
        })
        .collect()
}

fn mean(values: &[Duration]) -> Duration {
    let total: u128 = values.iter().map(Duration::as_nanos).sum();
    average(total, values.len())
}

fn average(total_nanos: u128, count: usize) -> Duration {
    let nanos = total_nanos / count.max(1) as u128;
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// Print summary rows as an aligned table.
pub fn write_summary<W: Write>(out: &mut W, rows: &[SummaryRow]) -> io::Result<()> {
    writeln!(out, "\nSummary (seconds)")?;
    writeln!(
        out,
        "{:<12} {:>5} {:<20} {:>4} {:>12} {:>12} {:>12} {:>12}",
        "strategy", "bs", "params", "runs", "bare mean", "bare min", "call mean", "call min"
    )?;
    for row in rows {
        writeln!(
            out,
            "{:<12} {:>5} {:<20} {:>4} {:>12.6} {:>12.6} {:>12.6} {:>12.6}",
            row.strategy.label(),
            row.batch,
            row.params.to_string(),
            row.runs,
            row.mean_bare_metal.as_secs_f64(),
            row.min_bare_metal.as_secs_f64(),
            row.mean_dispatch.as_secs_f64(),
            row.min_dispatch.as_secs_f64(),
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(strategy: Strategy, batch: usize, rep: usize, bare_ms: u64, call_ms: u64) -> BenchmarkResult {
        BenchmarkResult {
            strategy,
            batch,
            params: ParamTriple::square(100),
            repetition: rep,
            bare_metal: Duration::from_millis(bare_ms),
            dispatch: Duration::from_millis(call_ms),
            job_times: vec![Duration::from_millis(bare_ms)],
            passed: true,
        }
    }

    #[test]
    fn test_reporter_prints_header_once_per_cell() {
        let mut reporter = Reporter::new(Vec::new());
        reporter.result(&result(Strategy::SingleWorker, 5, 0, 1500, 2000)).unwrap();
        reporter.result(&result(Strategy::MultiWorkerCpu, 5, 0, 100, 900)).unwrap();
        reporter.result(&result(Strategy::SingleWorker, 10, 0, 250, 500)).unwrap();
        let text = String::from_utf8(reporter.into_inner()).unwrap();

        assert_eq!(text.matches("param: [5, 100, 100, 100]").count(), 1);
        assert_eq!(text.matches("param: [10, 100, 100, 100]").count(), 1);
        assert!(text.contains(
            "[Single CPU]\nBare Metal Time 1.500000\nServerless Call Time: 2.000000\nDispatch Overhead: 0.500000\n"
        ));
        assert!(text.contains("[Multi CPU]\n"));
    }

    #[test]
    fn test_summarize_groups_and_aggregates() {
        let results = vec![
            result(Strategy::SingleWorker, 5, 0, 100, 400),
            result(Strategy::MultiAccelerator, 5, 0, 10, 50),
            result(Strategy::SingleWorker, 5, 1, 300, 200),
        ];
        let rows = summarize(&results);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].strategy, Strategy::SingleWorker);
        assert_eq!(rows[0].runs, 2);
        assert_eq!(rows[0].mean_bare_metal, Duration::from_millis(200));
        assert_eq!(rows[0].min_bare_metal, Duration::from_millis(100));
        assert_eq!(rows[0].mean_dispatch, Duration::from_millis(300));
        assert_eq!(rows[0].min_dispatch, Duration::from_millis(200));
        assert_eq!(rows[1].strategy, Strategy::MultiAccelerator);
    }

    #[test]
    fn test_summary_table() {
        let rows = summarize(&[result(Strategy::SingleAccelerator, 15, 0, 20, 30)]);
        let mut out = Vec::new();
        write_summary(&mut out, &rows).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Single GPU"));
        assert!(text.contains("[100, 100, 100]"));
        assert!(text.contains("0.020000"));
    }

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[]), Duration::ZERO);
        assert_eq!(
            mean(&[Duration::from_millis(1), Duration::from_millis(2)]),
            Duration::from_micros(1500)
        );
        // Counts beyond u32::MAX keep their full width.
        assert_eq!(average(15_000_000_003, 5_000_000_001), Duration::from_nanos(3));
    }

    #[test]
    fn test_summarize_empty() {
        assert!(summarize(&[]).is_empty());
    }
}
