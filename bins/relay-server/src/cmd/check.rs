use relay_engine::RelayConfig;

use crate::cli::ConfigArgs;
use crate::error::ServerError;

pub fn run(args: ConfigArgs) -> Result<(), ServerError> {
    let config = RelayConfig::load(&args.config)?;
    println!(
        "{}: ok (workers={}, max_retry_count={}, rate_limit_per_second={}, absent_policy={:?})",
        args.config,
        config.pipe.workers,
        config.pipe.max_retry_count,
        config.target.rate_limit_per_second,
        config.pipe.absent_policy,
    );
    Ok(())
}
