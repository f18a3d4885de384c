mod common;
mod dispatch;
mod engine;
mod error;
mod guide_counts;
mod model;
mod plot;
mod posterior;
mod qc;
mod run_assign;
mod run_cellranger;
mod run_lib_size;
mod run_qc;

use crate::common::*;
use run_assign::*;
use run_cellranger::*;
use run_lib_size::*;
use run_qc::*;

#[derive(Parser, Debug)]
#[command(version, about, long_about, term_width = 80)]
///
/// Assign CRISPR guides to cells with a per-guide Bayesian mixture
/// model, fitted by CmdStan, and check the assignments.
///
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Posterior probability of each guide in each cell
    Assign(AssignArgs),

    /// MOI, coverage and figures of the assignments
    Qc(QcArgs),

    /// Per-cell or per-guide UMI sums of a guide matrix
    LibSize(LibSizeArgs),

    /// Guide x cell matrix out of a Cell Ranger feature matrix
    FromCellranger(FromCellrangerArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.commands {
        Commands::Assign(args) => {
            run_assign(args)?;
        }
        Commands::Qc(args) => {
            run_qc(args)?;
        }
        Commands::LibSize(args) => {
            run_lib_size(args)?;
        }
        Commands::FromCellranger(args) => {
            run_from_cellranger(args)?;
        }
    }

    Ok(())
}
