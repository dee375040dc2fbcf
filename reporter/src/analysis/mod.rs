pub mod normal_range;
pub mod normative_plot;
pub mod progression_plot;
