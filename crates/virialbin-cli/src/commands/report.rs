use crate::cli::ReportArgs;
use crate::error::Result;
use std::fmt;
use tracing::info;
use virialbin::engine::report::Report;
use virialbin::workflows::process;

pub async fn run(args: ReportArgs) -> Result<()> {
    info!("Reporting on {} raw file(s)...", args.inputs.len());
    let report = tokio::task::block_in_place(|| process::report_files(&args.inputs, args.reference))?;
    let n = model_size(&report);
    print!(
        "{}",
        ReportTable {
            report: &report,
            n,
            cost_ratio: args.cost_ratio,
        }
    );
    Ok(())
}

/// The model size implied by the number of orders, `nn = 1 + n(n-1)/2`.
fn model_size(report: &Report) -> usize {
    let nn = report.estimates.len();
    (1..=nn).find(|n| 1 + n * (n - 1) / 2 == nn).unwrap_or(0)
}

/// The human-readable block printed by `run` and `report`.
pub(crate) struct ReportTable<'a> {
    pub report: &'a Report,
    pub n: usize,
    pub cost_ratio: f64,
}

impl fmt::Display for ReportTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.report;
        writeln!(
            f,
            "{:>5}  {:>16}  {:>12}  {:>8}",
            "order", "average", "std. error", "between"
        )?;
        for e in &report.estimates {
            writeln!(
                f,
                "{:>5}  {:>16.8e}  {:>12.4e}  {:>8.4}",
                e.order, e.average, e.std_error, e.between_fraction
            )?;
        }
        let (sum, err) = report.combined();
        writeln!(f, "{:>5}  {:>16.8e}  {:>12.4e}", "sum", sum, err)?;
        if self.n >= 2 {
            let (b, b_err) = report.virial_coefficient(self.n);
            writeln!(f, "B{} = {:.8e} +/- {:.4e}", self.n, b, b_err)?;
        }
        writeln!(
            f,
            "bins {}  steps {}  not screened {:.5}  measured {:.5}  time fraction {:.5}",
            report.bin_count,
            report.total_steps,
            report.fraction_not_screened(),
            report.fraction_measured(),
            report.time_fraction(self.cost_ratio),
        )?;
        if let Some(corr) = &report.correlation {
            writeln!(f, "correlation")?;
            for row in corr.row_iter() {
                write!(f, " ")?;
                for c in row.iter() {
                    write!(f, " {:7.4}", c)?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}
