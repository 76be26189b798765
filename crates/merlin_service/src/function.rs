//! Source package of the trigger function that submits scheduled pipeline runs.

use crate::error::Result;

use merlin_core::prelude::*;
use std::io::{Cursor, Write};
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

pub const ENTRY_POINT: &str = "process_request";
pub const RUNTIME: &str = "python311";

const REQUIREMENTS: &str = "google-cloud-aiplatform>=1.38\n";

/// `main.py` of the function: reads `{pipeline_spec_uri, parameter_values}` from the request
/// body and submits one pipeline job.
pub fn handler(manifest: &PipelineManifest) -> Result<String> {
    let labels = serde_json::to_string(&manifest.labels)?;
    Ok(format!(
        r#"# Generated by merlin, do not edit.
import json

from google.cloud import aiplatform

PROJECT_ID = "{project}"
REGION = "{location}"
PIPELINE_ROOT = "{pipeline_root}"
PIPELINE_LABELS = json.loads("""{labels}""")
ENABLE_CACHING = {caching}


def {ENTRY_POINT}(request):
    payload = json.loads(request.data.decode("utf-8"))

    aiplatform.init(project=PROJECT_ID, location=REGION)
    job = aiplatform.PipelineJob(
        display_name="{name}",
        template_path=payload["pipeline_spec_uri"],
        pipeline_root=PIPELINE_ROOT,
        enable_caching=ENABLE_CACHING,
        parameter_values=payload["parameter_values"],
        labels=PIPELINE_LABELS,
    )
    job.submit()
    return "Job submitted"
"#,
        project = manifest.project,
        location = manifest.location,
        pipeline_root = manifest.pipeline_root,
        caching = if manifest.enable_caching { "True" } else { "False" },
        name = manifest.pipeline_name,
    ))
}

/// Zip archive holding `main.py` and `requirements.txt`.
pub fn package(manifest: &PipelineManifest) -> Result<Vec<u8>> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));

    zip.start_file("main.py", options)?;
    zip.write_all(handler(manifest)?.as_bytes())?;
    zip.start_file("requirements.txt", options)?;
    zip.write_all(REQUIREMENTS.as_bytes())?;

    Ok(zip.finish()?.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn manifest() -> PipelineManifest {
        PipelineManifest {
            pipeline_name: "nightly".into(),
            project: "proj".into(),
            location: "europe-west1".into(),
            pipeline_root: "gs://b/merlin-pipelines/nightly/executions/".into(),
            json_spec_path: "gs://b/spec.json".into(),
            parameter_values: Default::default(),
            labels: [("merlin_pipeline".to_string(), "nightly".to_string())].into(),
            enable_caching: false,
            service_account: None,
            network: None,
            schedule: None,
            image_refs: Vec::new(),
            compile_env_params: Default::default(),
            tensorboard: None,
        }
    }

    #[test]
    fn handler_targets_the_manifest_project() {
        let source = handler(&manifest()).unwrap();
        assert!(source.contains(r#"PROJECT_ID = "proj""#));
        assert!(source.contains(r#"PIPELINE_LABELS = json.loads("""{"merlin_pipeline":"nightly"}""")"#));
        assert!(source.contains("ENABLE_CACHING = False"));
        assert!(source.contains("def process_request(request):"));
    }

    #[test]
    fn package_contains_handler_and_requirements() {
        let bytes = package(&manifest()).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();

        let mut main = String::new();
        archive
            .by_name("main.py")
            .unwrap()
            .read_to_string(&mut main)
            .unwrap();
        assert!(main.contains(r#"display_name="nightly""#));

        let mut requirements = String::new();
        archive
            .by_name("requirements.txt")
            .unwrap()
            .read_to_string(&mut requirements)
            .unwrap();
        assert!(requirements.starts_with("google-cloud-aiplatform"));
    }
}
