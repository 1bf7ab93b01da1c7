use serde::{Deserialize, Serialize};
use std::fmt;

/// Usage record for one or more generation calls: token counts, wall
/// times, and the model that produced them. Folding records together
/// with [`GenerationStatistics::combine`] sums the numeric fields and
/// keeps the receiver's model name, so aggregation order never changes
/// the totals.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationStatistics {
    #[serde(default)]
    pub input_time: f64,
    #[serde(default)]
    pub output_time: f64,
    #[serde(default)]
    pub total_time: f64,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub model_name: String,
}

impl GenerationStatistics {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            ..Self::default()
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Prompt tokens per second, 0.0 when no input time was recorded.
    pub fn input_speed(&self) -> f64 {
        speed(self.input_tokens, self.input_time)
    }

    /// Completion tokens per second, 0.0 when no output time was recorded.
    pub fn output_speed(&self) -> f64 {
        speed(self.output_tokens, self.output_time)
    }

    pub fn total_speed(&self) -> f64 {
        speed(self.total_tokens(), self.total_time)
    }

    /// Adds `other`'s counters and timings into `self`. The receiver's
    /// model name is retained.
    pub fn combine(&mut self, other: &GenerationStatistics) {
        self.input_time += other.input_time;
        self.output_time += other.output_time;
        self.total_time += other.total_time;
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }

    /// Renders the record as a small markdown table.
    pub fn report(&self) -> String {
        format!(
            "### Generation Statistics ({model})\n\n\
             | Metric | Input | Output | Total |\n\
             |---|---|---|---|\n\
             | Tokens | {it} | {ot} | {tt} |\n\
             | Time (s) | {itime:.2} | {otime:.2} | {ttime:.2} |\n\
             | Speed (tok/s) | {ispeed:.1} | {ospeed:.1} | {tspeed:.1} |\n",
            model = self.model_name,
            it = self.input_tokens,
            ot = self.output_tokens,
            tt = self.total_tokens(),
            itime = self.input_time,
            otime = self.output_time,
            ttime = self.total_time,
            ispeed = self.input_speed(),
            ospeed = self.output_speed(),
            tspeed = self.total_speed(),
        )
    }
}

fn speed(tokens: u64, seconds: f64) -> f64 {
    if seconds <= 0.0 {
        0.0
    } else {
        tokens as f64 / seconds
    }
}

impl fmt::Display for GenerationStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.report())
    }
}
