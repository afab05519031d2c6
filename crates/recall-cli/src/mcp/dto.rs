use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct SearchArgs {
    pub query: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub doc_type: Option<String>,
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct TimelineArgs {
    pub anchor: i64,
    #[serde(default)]
    pub radius: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct GetObservationsArgs {
    pub ids: Vec<i64>,
}
