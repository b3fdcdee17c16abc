/*
 * Application Layer - Analysis service
 *
 * Wires the scheduler, summary store and detectors into one entry point:
 * - AnalysisService : validated config + shared summary store
 * - AnalysisReport  : summaries, defects, incomplete procedures, stats
 */

pub mod service;

pub use service::{AnalysisReport, AnalysisService};
