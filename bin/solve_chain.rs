use std::time::Instant;

use clap::{Parser, ValueEnum};
use nalgebra::{DMatrix, DVector};
use sparse_linear_solver::{
    BackendKind, DeviceCapability, GaussianFactorGraph, JacobianFactor, Key, LinearSolverConfig,
    Ordering, SolverError, SolverMethod, create_linear_solver, init_logger,
};
use tracing::{error, info};

/// Backend to run
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum BackendArg {
    /// Sequential elimination into a Bayes net
    Sequential,
    /// Sparse factorization on the host (default)
    #[default]
    Host,
    /// Sparse Cholesky on the host-emulated device
    Device,
    /// Run every backend and compare
    All,
}

/// Factorization method
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum MethodArg {
    #[default]
    Cholesky,
    Qr,
}

impl From<MethodArg> for SolverMethod {
    fn from(arg: MethodArg) -> Self {
        match arg {
            MethodArg::Cholesky => SolverMethod::Cholesky,
            MethodArg::Qr => SolverMethod::Qr,
        }
    }
}

#[derive(Parser)]
#[command(name = "solve_chain")]
#[command(about = "Solve a synthetic pose chain with the selected linear solver backend")]
struct Args {
    /// Backend to use
    #[arg(short, long, value_enum, default_value = "host")]
    backend: BackendArg,

    /// Factorization method
    #[arg(short, long, value_enum, default_value = "cholesky")]
    method: MethodArg,

    /// Number of poses in the chain
    #[arg(short, long, default_value = "100")]
    length: usize,

    /// Add a loop closure to the first pose every N poses (0 disables them)
    #[arg(long, default_value = "10")]
    loop_every: usize,

    /// Dimension of each pose
    #[arg(short, long, default_value = "3")]
    dimension: usize,

    /// Reverse the natural ordering
    #[arg(long)]
    reverse: bool,

    /// Print the solution vectors
    #[arg(short, long)]
    verbose: bool,
}

/// Chain with a prior on `x0`, scaled odometry between neighbours and periodic loop closures
fn build_chain(
    length: usize,
    loop_every: usize,
    dim: usize,
) -> Result<GaussianFactorGraph, SolverError> {
    if length == 0 || dim == 0 {
        return Err(SolverError::InvalidInput(
            "chain length and dimension must be positive".to_string(),
        ));
    }

    let x = |i: usize| Key::symbol('x', i as u64);
    let identity = DMatrix::<f64>::identity(dim, dim);
    let mut graph = GaussianFactorGraph::new();
    graph.add(JacobianFactor::unary(x(0), identity.clone(), DVector::zeros(dim))?);

    for i in 1..length {
        let scale = 1.0 + 0.1 * (i as f64).sin();
        let z = DVector::from_fn(dim, |r, _| ((i + r) as f64 * 0.37).cos());
        graph.add(JacobianFactor::binary(
            x(i - 1),
            -identity.clone(),
            x(i),
            &identity * scale,
            z,
        )?);
    }

    if loop_every > 0 {
        for i in (loop_every..length).step_by(loop_every) {
            let z = DVector::from_fn(dim, |r, _| ((i * r) as f64 * 0.11).sin());
            graph.add(JacobianFactor::binary(x(0), -identity.clone(), x(i), identity.clone(), z)?);
        }
    }

    Ok(graph)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logger();

    let graph = build_chain(args.length, args.loop_every, args.dimension)?;
    info!("{}", graph.statistics()?);

    let mut ordering = Ordering::natural(&graph);
    if args.reverse {
        ordering = ordering.reversed();
    }

    let method = SolverMethod::from(args.method);
    let backends = match args.backend {
        BackendArg::Sequential => vec![BackendKind::Sequential],
        BackendArg::Host => vec![BackendKind::HostSparse],
        BackendArg::Device => vec![BackendKind::Device],
        BackendArg::All => vec![
            BackendKind::Sequential,
            BackendKind::HostSparse,
            BackendKind::Device,
        ],
    };

    let capability = DeviceCapability::host_emulated();
    let mut failures = 0;
    for backend in backends {
        let config = LinearSolverConfig::new()
            .with_backend(backend)
            .with_method(method);
        info!("{}", config);

        let start = Instant::now();
        let result = create_linear_solver(&config, ordering.clone(), &capability)
            .and_then(|mut solver| {
                let values = solver.solve(&graph)?;
                Ok((values, solver.last_stats().cloned(), solver.name()))
            });

        match result {
            Ok((values, stats, name)) => {
                let error = graph.error(&values).unwrap_or(f64::NAN);
                info!(
                    "{}: solved in {:.3} ms, residual error {:.6e}, |dx| = {:.6}",
                    name,
                    start.elapsed().as_secs_f64() * 1000.0,
                    error,
                    values.norm()
                );
                if let Some(stats) = stats {
                    info!("{}: {}", name, stats);
                }
                if args.verbose {
                    println!("{values}");
                }
            }
            Err(e) => {
                failures += 1;
                error!("{} / {} failed: {}", backend, method, e);
            }
        }
    }

    if failures > 0 {
        return Err(format!("{failures} backend(s) failed").into());
    }
    Ok(())
}
