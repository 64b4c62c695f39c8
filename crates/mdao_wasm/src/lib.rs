//! JavaScript bindings for the MDAO engine.
//!
//! Requests and results cross the boundary as plain JS objects shaped like
//! the engine's serde types. Every binding delegates to a plain-Rust helper so
//! the logic can be exercised natively.

use anyhow::{Context, Result};
use mdao_core::cancel::CancellationToken;
use mdao_core::driver::OptimizerKind;
use mdao_core::equation_engine::BytecodeEvaluator;
use mdao_core::model::{ModelGraph, ResultEntry};
use mdao_core::request::{
    solve_model, solve_multi_discipline, solve_problem, MultiDisciplineRequest, ProblemRequest,
    SolveOutcome,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_wasm_bindgen::{from_value, to_value};
use wasm_bindgen::prelude::*;

fn to_js_error(err: anyhow::Error) -> JsValue {
    JsValue::from_str(&format!("{err:#}"))
}

fn parse_request<T: DeserializeOwned>(request: JsValue) -> Result<T, JsValue> {
    from_value(request).map_err(|e| JsValue::from_str(&format!("Invalid request: {}", e)))
}

fn serialize<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    to_value(value).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

fn run_multi_discipline(request: &MultiDisciplineRequest) -> Result<Vec<ResultEntry>> {
    let outcome = solve_multi_discipline(request, &CancellationToken::new())
        .context("Multi-discipline solve failed")?;
    Ok(outcome.results)
}

fn run_problem(request: &ProblemRequest) -> Result<Vec<ResultEntry>> {
    let outcome =
        solve_problem(request, &CancellationToken::new()).context("Problem solve failed")?;
    Ok(outcome.results)
}

/// Evaluates or optimizes a multi-discipline request and returns its
/// `{id, value}` result list.
#[wasm_bindgen(js_name = solveMultiDisciplineProblem)]
pub fn solve_multi_discipline_problem(request: JsValue) -> Result<JsValue, JsValue> {
    console_error_panic_hook::set_once();
    let request: MultiDisciplineRequest = parse_request(request)?;
    let results = run_multi_discipline(&request).map_err(to_js_error)?;
    serialize(&results)
}

/// Optimizes a single-component connected request.
#[wasm_bindgen(js_name = solveProblem)]
pub fn solve_problem_request(request: JsValue) -> Result<JsValue, JsValue> {
    console_error_panic_hook::set_once();
    let request: ProblemRequest = parse_request(request)?;
    let results = run_problem(&request).map_err(to_js_error)?;
    serialize(&results)
}

/// An assembled model kept alive across calls, so independents can be
/// changed and the model re-solved without re-assembling.
#[wasm_bindgen]
pub struct WasmModel {
    model: ModelGraph,
    optimizer: Option<String>,
}

impl WasmModel {
    fn from_request(request: &MultiDisciplineRequest) -> Result<Self> {
        let model = request
            .build(&BytecodeEvaluator)
            .context("Model assembly failed")?;
        Ok(Self {
            model,
            optimizer: request.driver.as_ref().map(|d| d.optimizer.clone()),
        })
    }

    fn evaluate(&mut self) -> Result<Vec<ResultEntry>> {
        self.model
            .run_model(&CancellationToken::new())
            .context("Model evaluation failed")
    }

    fn optimize_with(&mut self, optimizer: Option<&str>) -> Result<SolveOutcome> {
        let name = optimizer
            .or(self.optimizer.as_deref())
            .context("No optimizer given and the request names none")?;
        let kind = OptimizerKind::from_name(name)?;
        solve_model(&mut self.model, Some(kind), &CancellationToken::new())
            .context("Optimization failed")
    }
}

#[wasm_bindgen]
impl WasmModel {
    #[wasm_bindgen(constructor)]
    pub fn new(request: JsValue) -> Result<WasmModel, JsValue> {
        console_error_panic_hook::set_once();
        let request: MultiDisciplineRequest = parse_request(request)?;
        WasmModel::from_request(&request).map_err(to_js_error)
    }

    #[wasm_bindgen(js_name = runModel)]
    pub fn run_model(&mut self) -> Result<JsValue, JsValue> {
        let results = self.evaluate().map_err(to_js_error)?;
        serialize(&results)
    }

    /// Runs the optimizer named here, or the one from the original request.
    pub fn optimize(&mut self, optimizer: Option<String>) -> Result<JsValue, JsValue> {
        let outcome = self
            .optimize_with(optimizer.as_deref())
            .map_err(to_js_error)?;
        serialize(&outcome)
    }

    #[wasm_bindgen(js_name = setValue)]
    pub fn set_value(&mut self, id: &str, value: f64) -> Result<(), JsValue> {
        self.model
            .set_value(id, value)
            .map_err(|e| JsValue::from_str(&e.to_string()))
    }

    #[wasm_bindgen(js_name = getValue)]
    pub fn get_value(&self, id: &str) -> Result<f64, JsValue> {
        self.model
            .value(id)
            .map_err(|e| JsValue::from_str(&e.to_string()))
    }

    pub fn warnings(&self) -> Result<JsValue, JsValue> {
        serialize(&self.model.warnings())
    }

    pub fn phase(&self) -> String {
        format!("{:?}", self.model.phase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdao_core::model::SolvePhase;
    use serde_json::json;

    fn request() -> MultiDisciplineRequest {
        serde_json::from_value(json!({
            "driver": { "id": "1", "optimizer": "COBYLA", "optimize": false },
            "independantVariables": [{ "id": "x", "value": 2.0 }, { "id": "y", "value": 1.0 }],
            "designVariables": [
                { "id": "x", "lowerBound": -50.0, "upperBound": 50.0 },
                { "id": "y", "lowerBound": -50.0, "upperBound": 50.0 }
            ],
            "group": {
                "id": "1",
                "name": "g",
                "explicitDisciplines": [{
                    "id": "1",
                    "component": { "id": "1", "name": "parab", "equation": "f = (x-3)**2 + x*y + (y+4)**2 - 3" },
                    "promotesInputs": ["x", "y"],
                    "promotesOutputs": ["f"]
                }]
            },
            "constraints": [],
            "objective": { "id": "obj", "equation": "obj = f", "promotes": ["*"] }
        }))
        .expect("request should deserialize")
    }

    #[test]
    fn helpers_solve_requests() {
        let results = run_multi_discipline(&request()).unwrap();
        assert_eq!(results[0], ResultEntry::new("obj", 25.0));
        assert_eq!(results[1], ResultEntry::new("f", 25.0));
    }

    #[test]
    fn model_handle_keeps_state_between_calls() {
        let mut handle = WasmModel::from_request(&request()).unwrap();
        assert_eq!(handle.evaluate().unwrap()[0].value, 25.0);

        handle.model.set_value("x", 3.0).unwrap();
        let results = handle.evaluate().unwrap();
        // (0)^2 + 3*1 + 25 - 3
        assert_eq!(results[0].value, 25.0);
        assert_eq!(handle.model.value("x").unwrap(), 3.0);

        let outcome = handle.optimize_with(None).unwrap();
        assert!(outcome.results[0].value < 25.0);
        assert_eq!(outcome.report.unwrap().optimizer, "cobyla");
        assert_eq!(handle.model.phase(), SolvePhase::Converged);
    }

    #[test]
    fn unknown_optimizer_is_reported_with_context() {
        let mut handle = WasmModel::from_request(&request()).unwrap();
        let err = handle.optimize_with(Some("BFGS")).unwrap_err();
        assert!(format!("{err:#}").contains("unsupported optimizer 'BFGS'"));
    }

    #[test]
    fn assembly_errors_carry_context() {
        let mut bad = request();
        bad.objective.equation = Some("obj = f + q".to_string());
        let err = WasmModel::from_request(&bad).err().expect("q is undeclared");
        let message = format!("{err:#}");
        assert!(message.starts_with("Model assembly failed"), "{message}");
        assert!(message.contains("'q'"), "{message}");
    }
}

#[cfg(all(test, target_arch = "wasm32"))]
mod wasm_tests {
    use super::*;
    use wasm_bindgen_test::wasm_bindgen_test;

    #[wasm_bindgen_test]
    fn invalid_request_is_rejected() {
        let err = solve_multi_discipline_problem(JsValue::from_str("not a request"))
            .expect_err("strings are not requests");
        assert!(err.as_string().unwrap_or_default().contains("Invalid request"));
    }
}
