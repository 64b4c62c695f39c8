pub mod assembly;
pub mod cancel;
pub mod cobyla;
pub mod coupling;
pub mod driver;
pub mod equation;
pub mod equation_engine;
pub mod error;
pub mod model;
pub mod registry;
pub mod request;
/// The `mdao_core` crate assembles and solves multidisciplinary design
/// optimization problems described as symbolic equations.
///
/// Key components:
/// - **Traits**: `ExpressionEvaluator`/`CompiledExpression` (equation backends), `Optimizer`/`OptimizationProblem` (driver backends).
/// - **Equation Engine**: A bytecode VM implementing the expression evaluator.
/// - **Assembly**: `ModelBuilder` resolves promotions and connections into a `ModelGraph`.
/// - **Coupling**: Nonlinear block Gauss-Seidel over each `DisciplineGroup`.
/// - **Driver**: Augmented Lagrangian, COBYLA-style and Nelder-Mead optimizers over re-converged models.
pub mod traits;
