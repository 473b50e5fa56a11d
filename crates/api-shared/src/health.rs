use crate::models::HealthRes;

/// Health check used by the REST surface and by load balancer probes.
#[derive(Clone, Default)]
pub struct HealthService;

impl HealthService {
    /// Returns a `HealthRes` indicating the service is up.
    ///
    /// This does not touch the database; environment connectivity is only exercised by
    /// real requests.
    pub fn check_health() -> HealthRes {
        HealthRes {
            ok: true,
            message: "Test data service is alive".into(),
        }
    }
}
