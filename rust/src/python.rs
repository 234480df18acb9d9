use ndarray::Array2;
use numpy::{PyArray1, PyArray2, PyReadonlyArray2};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;
use pyo3::wrap_pyfunction;

use crate::cancel::CancellationToken;
use crate::config::PipelineConfig;
use crate::distance::{pairwise_distance_matrix, DistanceMetric};
use crate::embedding::Embedding;
use crate::ensemble::ResamplingEnsemble;
use crate::error::Error;
use crate::pipeline::Pipeline;

fn to_py_err(e: Error) -> PyErr {
    match e {
        Error::NumericalInstability(_)
        | Error::DisconnectedGraph { .. }
        | Error::Serialization(_) => {
            PyRuntimeError::new_err(e.to_string())
        }
        _ => PyValueError::new_err(e.to_string()),
    }
}

fn parse_config(config_json: Option<&str>) -> PyResult<PipelineConfig> {
    match config_json {
        Some(json) => PipelineConfig::from_json_str(json).map_err(to_py_err),
        None => Ok(PipelineConfig::default()),
    }
}

fn build_embedding(
    embedding: PyReadonlyArray2<f64>,
    cell_ids: Option<Vec<String>>,
) -> PyResult<Embedding> {
    let values = embedding.as_array().to_owned();
    let result = match cell_ids {
        Some(ids) => Embedding::new(ids, values),
        None => Embedding::from_matrix(values),
    };
    result.map_err(to_py_err)
}

/// Run clustering, lineage inference and pseudotime fitting.
///
/// # Arguments
/// * `embedding` - (n_cells, n_dims) embedding matrix
/// * `cell_ids` - Optional cell identifiers (default: "cell_<i>")
/// * `config_json` - Optional JSON configuration; missing fields use defaults
/// * `labels` - Optional precomputed cluster labels (-1 = unassigned); skips
///   the resampling ensemble
///
/// # Returns
/// * Dict with keys: "cell_ids", "labels", "stability", "pseudotime"
///   (n_cells, n_lineages; NaN where undefined), "weights", "root",
///   "branch_points", "lineages", "edges", "status", "warnings", "json"
#[pyfunction]
#[pyo3(signature = (embedding, cell_ids=None, config_json=None, labels=None))]
fn run_trajectory_inference<'py>(
    py: Python<'py>,
    embedding: PyReadonlyArray2<f64>,
    cell_ids: Option<Vec<String>>,
    config_json: Option<&str>,
    labels: Option<Vec<i32>>,
) -> PyResult<&'py PyDict> {
    let config = parse_config(config_json)?;
    let embedding = build_embedding(embedding, cell_ids)?;
    let pipeline = Pipeline::new(config).map_err(to_py_err)?;
    let cancel = CancellationToken::new();

    let output = match labels {
        Some(labels) => pipeline.run_with_labels(&embedding, labels, &cancel),
        None => pipeline.run(&embedding, &cancel),
    }
    .map_err(to_py_err)?;

    let n = output.cells.len();
    let m = output.graph.lineages.len();
    let mut pseudotime = Array2::<f64>::from_elem((n, m), f64::NAN);
    let mut weights = Array2::<f64>::zeros((n, m));
    for (i, cell) in output.cells.iter().enumerate() {
        for entry in &cell.lineages {
            if let Some(t) = entry.pseudotime {
                pseudotime[[i, entry.lineage]] = t;
            }
            weights[[i, entry.lineage]] = entry.weight;
        }
    }

    let cell_ids: Vec<String> = output.cells.iter().map(|c| c.cell_id.clone()).collect();
    let cluster_labels: Vec<i32> = output.cells.iter().map(|c| c.cluster).collect();
    let stability: Vec<f64> = output.cells.iter().map(|c| c.stability).collect();
    let lineages: Vec<Vec<usize>> = output
        .graph
        .lineages
        .iter()
        .map(|l| l.clusters.clone())
        .collect();
    let edges: Vec<(usize, usize, f64)> = output
        .graph
        .edges
        .iter()
        .map(|e| (e.parent, e.child, e.weight))
        .collect();
    let warnings: Vec<String> = output.summary.warnings.iter().map(|w| w.to_string()).collect();
    let status = if output.summary.status.is_cancelled() {
        "cancelled"
    } else {
        "complete"
    };
    let json = output.to_json().map_err(to_py_err)?;

    let result = PyDict::new(py);
    result.set_item("cell_ids", cell_ids)?;
    result.set_item("labels", PyArray1::from_vec(py, cluster_labels))?;
    result.set_item("stability", PyArray1::from_vec(py, stability))?;
    result.set_item("pseudotime", PyArray2::from_owned_array(py, pseudotime))?;
    result.set_item("weights", PyArray2::from_owned_array(py, weights))?;
    result.set_item("root", output.graph.root)?;
    result.set_item("branch_points", output.graph.branch_points.clone())?;
    result.set_item("lineages", lineages)?;
    result.set_item("edges", edges)?;
    result.set_item("status", status)?;
    result.set_item("warnings", warnings)?;
    result.set_item("json", json)?;

    Ok(result)
}

/// Compute the co-clustering proportion matrix of the resampling ensemble.
///
/// # Arguments
/// * `embedding` - (n_cells, n_dims) embedding matrix
/// * `config_json` - Optional JSON configuration; only "clustering" is read
///
/// # Returns
/// * (n_cells, n_cells) symmetric matrix with entries in [0, 1]
#[pyfunction]
#[pyo3(signature = (embedding, config_json=None))]
fn compute_coclustering<'py>(
    py: Python<'py>,
    embedding: PyReadonlyArray2<f64>,
    config_json: Option<&str>,
) -> PyResult<&'py PyArray2<f64>> {
    let config = parse_config(config_json)?;
    let embedding = build_embedding(embedding, None)?;
    let ensemble = ResamplingEnsemble::new(config.clustering).map_err(to_py_err)?;
    let (matrix, _) = ensemble
        .coclustering(&embedding, &CancellationToken::new())
        .map_err(to_py_err)?;
    Ok(PyArray2::from_owned_array(py, matrix.proportions().to_owned()))
}

/// Compute a pairwise distance matrix between embedding rows.
///
/// # Arguments
/// * `points` - (n, d) matrix
/// * `metric` - "euclidean", "manhattan" or "cosine" (default: "euclidean")
///
/// # Returns
/// * (n, n) symmetric distance matrix
#[pyfunction]
#[pyo3(signature = (points, metric="euclidean"))]
fn compute_distance_matrix<'py>(
    py: Python<'py>,
    points: PyReadonlyArray2<f64>,
    metric: &str,
) -> PyResult<&'py PyArray2<f64>> {
    let metric: DistanceMetric = serde_json::from_value(serde_json::Value::String(metric.to_string()))
        .map_err(|e| PyValueError::new_err(format!("unknown metric {:?}: {}", metric, e)))?;
    if !metric.is_pointwise() {
        return Err(PyValueError::new_err(format!(
            "{:?} is only defined between clusters",
            metric
        )));
    }
    let distances = pairwise_distance_matrix(points.as_array(), metric);
    Ok(PyArray2::from_owned_array(py, distances))
}

/// Python module definition
#[pymodule]
fn cellfate_rust(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(run_trajectory_inference, m)?)?;
    m.add_function(wrap_pyfunction!(compute_coclustering, m)?)?;
    m.add_function(wrap_pyfunction!(compute_distance_matrix, m)?)?;
    Ok(())
}
