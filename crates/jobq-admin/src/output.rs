use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, Table};
use jobq_core::{format_timestamp, Job, JobState};

/// How command results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

fn table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(header);
    table
}

/// Job counts per state. Every state is present, zero or not.
pub fn render_counts(counts: &[(JobState, u64)], format: OutputFormat) -> anyhow::Result<String> {
    let map: serde_json::Map<String, serde_json::Value> = counts
        .iter()
        .map(|(state, count)| (state.to_string(), (*count).into()))
        .collect();

    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(&map)?,
        OutputFormat::Yaml => serde_yaml::to_string(&map)?,
        OutputFormat::Table => {
            let mut table = table(vec!["State", "Count"]);
            for (state, count) in counts {
                table.add_row(vec![state.to_string(), count.to_string()]);
            }
            let total: u64 = counts.iter().map(|(_, count)| count).sum();
            table.add_row(vec!["total".to_string(), total.to_string()]);
            table.to_string()
        }
    };
    Ok(rendered)
}

pub fn render_jobs(jobs: &[Job], format: OutputFormat) -> anyhow::Result<String> {
    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(jobs)?,
        OutputFormat::Yaml => serde_yaml::to_string(jobs)?,
        OutputFormat::Table => {
            if jobs.is_empty() {
                return Ok("No jobs found".to_string());
            }
            let mut table = table(vec![
                "ID", "Command", "State", "Attempts", "Priority", "Created", "Updated",
            ]);
            for job in jobs {
                table.add_row(vec![
                    job.id.clone(),
                    job.command.clone(),
                    job.state.to_string(),
                    format!("{}/{}", job.attempts, job.max_retries),
                    job.priority.to_string(),
                    format_timestamp(&job.created_at),
                    format_timestamp(&job.updated_at),
                ]);
            }
            table.to_string()
        }
    };
    Ok(rendered)
}

pub fn render_job(job: &Job, format: OutputFormat) -> anyhow::Result<String> {
    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(job)?,
        OutputFormat::Yaml => serde_yaml::to_string(job)?,
        OutputFormat::Table => {
            let mut table = table(vec!["Field", "Value"]);
            table.add_row(vec!["ID", &job.id]);
            table.add_row(vec!["Command", &job.command]);
            table.add_row(vec!["State", job.state.as_str()]);
            table.add_row(vec!["Attempts", &job.attempts.to_string()]);
            table.add_row(vec!["Max Retries", &job.max_retries.to_string()]);
            table.add_row(vec!["Priority", &job.priority.to_string()]);
            table.add_row(vec!["Created", &format_timestamp(&job.created_at)]);
            table.add_row(vec!["Updated", &format_timestamp(&job.updated_at)]);
            table.to_string()
        }
    };
    Ok(rendered)
}

pub fn render_config(entries: &[(&str, String)], format: OutputFormat) -> anyhow::Result<String> {
    let map: serde_json::Map<String, serde_json::Value> = entries
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone().into()))
        .collect();

    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(&map)?,
        OutputFormat::Yaml => serde_yaml::to_string(&map)?,
        OutputFormat::Table => {
            let mut table = table(vec!["Key", "Value"]);
            for (key, value) in entries {
                table.add_row(vec![key.to_string(), value.clone()]);
            }
            table.to_string()
        }
    };
    Ok(rendered)
}
