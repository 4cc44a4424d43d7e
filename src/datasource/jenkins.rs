use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::ch::{ByteBuf, ColumnInfo, ColumnList, DataType};
use crate::datasource::registry::SourceFactory;
use crate::datasource::{DataSource, DataSourceConfig, SourceCore};
use crate::error::{BridgeError, Result};
use crate::query::QueryParameters;
use crate::resolver::NameResolver;
use crate::streaming::ResponseWriter;

pub const DATASOURCE_TYPE: &str = "jenkins";

pub fn factory() -> SourceFactory {
    Arc::new(|id: &str, resolver: &Arc<dyn NameResolver>, config: Option<&Value>| {
        Ok(Arc::new(JenkinsDataSource::new(id, resolver, config)) as Arc<dyn DataSource>)
    })
}

#[derive(Debug, Deserialize)]
struct JobListing {
    #[serde(default)]
    jobs: Vec<Job>,
}

#[derive(Debug, Deserialize)]
struct Job {
    #[serde(rename = "_class", default)]
    class: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    url: String,
    color: Option<String>,
}

/// Jenkins CI server exposed as a data source: every query lists the
/// server's jobs. Mostly a demonstration that source types beyond SQL plug
/// into the registry.
pub struct JenkinsDataSource {
    core: SourceCore,
    base_url: String,
    client: reqwest::Client,
}

impl JenkinsDataSource {
    pub fn new(id: &str, resolver: &Arc<dyn NameResolver>, raw: Option<&Value>) -> Self {
        let core = SourceCore::new(id, raw);
        let config = raw.map(|raw| DataSourceConfig::from_value(id, raw)).unwrap_or_default();

        let base_url = match &config.url {
            Some(url) => resolver.resolve(url),
            None => {
                let url = id.strip_prefix("jenkins:").unwrap_or(id);
                let url = url.split_once('?').map_or(url, |(head, _)| head);
                url.to_string()
            }
        };

        JenkinsDataSource {
            core,
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn job_columns() -> ColumnList {
        ColumnList::new(vec![
            ColumnInfo::new("class", DataType::String, false, 0, 0),
            ColumnInfo::new("name", DataType::String, false, 0, 0),
            ColumnInfo::new("url", DataType::String, false, 0, 0),
            ColumnInfo::new("color", DataType::String, true, 0, 0),
        ])
    }

    fn job_field<'a>(job: &'a Job, name: &str) -> Option<Option<&'a str>> {
        match name {
            "class" => Some(Some(&job.class)),
            "name" => Some(Some(&job.name)),
            "url" => Some(Some(&job.url)),
            "color" => Some(job.color.as_deref()),
            _ => None,
        }
    }
}

#[async_trait]
impl DataSource for JenkinsDataSource {
    fn core(&self) -> &SourceCore {
        &self.core
    }

    fn source_type(&self) -> &'static str {
        DATASOURCE_TYPE
    }

    async fn infer_columns(&self, _schema: &str, _query: &str) -> Result<ColumnList> {
        Ok(Self::job_columns())
    }

    async fn execute_query(
        &self,
        query: &str,
        columns: &ColumnList,
        params: &QueryParameters,
        writer: &mut ResponseWriter,
    ) -> Result<()> {
        info!("Listing jobs of [{}] for query:\n{query}", self.base_url);

        let url = format!("{}/api/json?tree=jobs[name,url,color]", self.base_url);
        let listing: JobListing = self.client.get(&url).send().await?.error_for_status()?.json().await?;

        let requested = if columns.has_column() { columns.clone() } else { Self::job_columns() };

        let mut emitted: i64 = 0;
        for job in &listing.jobs {
            emitted += 1;
            if params.max_rows > 0 && emitted > params.max_rows as i64 {
                break;
            }

            if !writer.is_open() {
                return Err(BridgeError::WriterClosed);
            }

            let mut buf = ByteBuf::new(requested.size() * 16);
            for column in requested.columns() {
                let value = Self::job_field(job, &column.name)
                    .ok_or_else(|| BridgeError::backend(format!("unknown job column [{}]", column.name)))?;

                match value {
                    Some(value) => {
                        if column.nullable {
                            buf.write_non_null();
                        }
                        buf.write_string(value);
                    }
                    None => {
                        if column.nullable {
                            buf.write_null();
                        } else {
                            buf.write_string("");
                        }
                    }
                }
            }

            writer.write(buf).await?;
        }

        Ok(())
    }
}
