//! Command-line entry points for the three reports.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use tracing::info;

use crate::analysis::normative_plot::generate_plots;
use crate::config::{
    default_study_dir, DataSources, ScanConfig, DEFAULT_AUTOPROC_ROOT, DEFAULT_NORMATIVE_PATH,
    DEFAULT_NORMATIVE_SHEET, DEFAULT_OUTPUT_DIR, DEFAULT_SCAN_TYPE,
};
use crate::progression::{generate_progression, load_history, ProgressionRequest};
use crate::table::{generate_table, PipelineOverrides};

/// Parse a `ROI=PIPELINE` override
fn parse_override(s: &str) -> Result<(String, String), String> {
    let (roi, pipeline) = s
        .split_once('=')
        .ok_or_else(|| format!("'{s}' is not ROI=PIPELINE"))?;
    let (roi, pipeline) = (roi.trim(), pipeline.trim());
    if roi.is_empty() || pipeline.is_empty() {
        return Err(format!("'{s}' is not ROI=PIPELINE"));
    }
    Ok((roi.to_string(), pipeline.to_string()))
}

/// Parse a `YYYYMMDD` date
fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y%m%d").map_err(|_| format!("'{s}' is not a YYYYMMDD date"))
}

/// 2HG spectroscopy reports: normative boxplots, pipeline tables and progression charts.
#[derive(Parser, Debug)]
#[command(name = "reporter", version)]
pub struct Cli {
    /// Verbosity (-v prints each best-pipeline plot, -vv also AllPipelines plots and debug logs)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(flatten)]
    pub sources: SourceArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// AutoProc output root holding one directory per scan
    #[arg(long, global = true, env = "AUTOPROC_ROOT", default_value = DEFAULT_AUTOPROC_ROOT)]
    pub autoproc_root: PathBuf,

    /// Normative ranges workbook
    #[arg(long = "normative", global = true, env = "NORMATIVE_RANGES", default_value = DEFAULT_NORMATIVE_PATH)]
    pub normative_path: PathBuf,

    /// Sheet of the normative workbook
    #[arg(long, global = true, default_value = DEFAULT_NORMATIVE_SHEET)]
    pub normative_sheet: String,

    /// Study database directory (Input*/Output* workbooks)
    #[arg(long, global = true, env = "STUDY_DIR")]
    pub study_dir: Option<PathBuf>,
}

impl SourceArgs {
    pub fn into_sources(self) -> DataSources {
        DataSources {
            autoproc_root: self.autoproc_root,
            normative_path: self.normative_path,
            normative_sheet: self.normative_sheet,
            study_dir: self.study_dir.unwrap_or_else(default_study_dir),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ScanArgs {
    /// Scan identifier, `<patient>_<YYYYMMDD>`
    pub scan_id: String,

    /// Acquisition tag in result file names
    #[arg(default_value = DEFAULT_SCAN_TYPE)]
    pub scan_type: String,

    /// Directory receiving `<scan_id>/...` artifacts
    #[arg(long, short = 'o', default_value = DEFAULT_OUTPUT_DIR)]
    pub output_dir: PathBuf,
}

impl ScanArgs {
    pub fn into_config(self, verbose: u8) -> ScanConfig {
        ScanConfig {
            scan_id: self.scan_id,
            scan_type: self.scan_type,
            output_dir: self.output_dir,
            verbose,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Plot every result file against the normative ranges
    Plots {
        #[command(flatten)]
        scan: ScanArgs,
    },

    /// Summary table of the best (or chosen) pipeline per ROI
    Table {
        #[command(flatten)]
        scan: ScanArgs,

        /// Report PIPELINE for ROI instead of the best pipeline (repeatable)
        #[arg(long = "pipeline", value_name = "ROI=PIPELINE", value_parser = parse_override)]
        pipelines: Vec<(String, String)>,
    },

    /// Chart metabolite values across a patient's scans
    Progression {
        #[command(flatten)]
        scan: ScanArgs,

        /// JSON scan history (ROI -> list of CSV paths or SpecN keys); enables manual mode
        #[arg(long)]
        history: Option<PathBuf>,

        /// Leave out past scans from this date in automatic mode (repeatable)
        #[arg(
            long = "exclude-date",
            value_name = "YYYYMMDD",
            value_parser = parse_date,
            conflicts_with = "history"
        )]
        exclude_dates: Vec<NaiveDate>,
    },
}

pub fn run(cli: Cli) -> Result<()> {
    let sources = cli.sources.into_sources();
    let verbose = cli.verbose;

    match cli.command {
        Commands::Plots { scan } => {
            let scan = scan.into_config(verbose);
            let summary = generate_plots(&scan, &sources)
                .with_context(|| format!("Failed to plot scan {}", scan.scan_id))?;
            info!("{} plots saved, {} files failed", summary.saved.len(), summary.failed.len());
        }
        Commands::Table { scan, pipelines } => {
            let scan = scan.into_config(verbose);
            let overrides: PipelineOverrides = pipelines.into_iter().collect();
            let path = generate_table(&scan, &sources, &overrides)
                .with_context(|| format!("Failed to build the table for scan {}", scan.scan_id))?;
            info!("Table written to {}", path.display());
        }
        Commands::Progression {
            scan,
            history,
            exclude_dates,
        } => {
            let scan = scan.into_config(verbose);
            let request = match history {
                Some(path) => ProgressionRequest::Manual(
                    load_history(&path)
                        .with_context(|| format!("Failed to read scan history {}", path.display()))?,
                ),
                None => ProgressionRequest::Auto {
                    dates_to_exclude: exclude_dates,
                },
            };
            let path = generate_progression(&scan, &sources, &request)
                .with_context(|| format!("Failed to chart progression for scan {}", scan.scan_id))?;
            info!("Progression chart written to {}", path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_type_and_output_dir_default() {
        let cli = Cli::try_parse_from(["reporter", "plots", "PT01_20200101"]).unwrap();
        assert_eq!(cli.verbose, 0);
        match cli.command {
            Commands::Plots { scan } => {
                let config = scan.into_config(0);
                assert_eq!(config.scan_type, "svs_se_97");
                assert_eq!(config.output_dir, PathBuf::from("./output"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn table_collects_pipeline_overrides() {
        let cli = Cli::try_parse_from([
            "reporter", "-vv", "table", "PT01_20200101", "--pipeline", "Lesion=LCModel", "--pipeline", "CL=Osprey",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Table { pipelines, .. } => {
                let overrides: PipelineOverrides = pipelines.into_iter().collect();
                assert_eq!(overrides["Lesion"], "LCModel");
                assert_eq!(overrides["CL"], "Osprey");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bad_override_and_date_are_rejected() {
        assert!(Cli::try_parse_from(["reporter", "table", "PT01_20200101", "--pipeline", "Lesion"]).is_err());
        assert!(Cli::try_parse_from(["reporter", "progression", "PT01_20200101", "--exclude-date", "2020-01-01"]).is_err());
    }

    #[test]
    fn progression_parses_exclusions() {
        let cli = Cli::try_parse_from([
            "reporter", "progression", "PT01_20200101", "press", "--exclude-date", "20190110",
        ])
        .unwrap();
        match cli.command {
            Commands::Progression { scan, history, exclude_dates } => {
                assert_eq!(scan.scan_type, "press");
                assert!(history.is_none());
                assert_eq!(exclude_dates, vec![NaiveDate::from_ymd_opt(2019, 1, 10).unwrap()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn exclusions_need_automatic_mode() {
        let parsed = Cli::try_parse_from([
            "reporter", "progression", "PT01_20200101", "--history", "h.json", "--exclude-date", "20190110",
        ]);
        assert!(parsed.is_err());
    }
}
