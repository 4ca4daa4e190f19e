//! Error types for each bounded context

use crate::define_domain_error;

define_domain_error!(
    /// Errors raised by category repositories
    CategoryError, CategoryErrorType, "Category"
);

define_domain_error!(
    /// Errors raised by queue repositories
    QueueError, QueueErrorType, "Queue"
);

define_domain_error!(
    /// Errors raised by payment repositories
    PaymentError, PaymentErrorType, "Payment"
);

define_domain_error!(
    /// Errors raised by shop repositories
    ShopError, ShopErrorType, "Shop"
);

define_domain_error!(
    /// Errors raised by customer repositories
    CustomerError, CustomerErrorType, "Customer"
);

define_domain_error!(
    /// Errors raised by service repositories
    ServiceError, ServiceErrorType, "Service"
);

define_domain_error!(
    /// Errors raised by employee repositories
    EmployeeError, EmployeeErrorType, "Employee"
);

define_domain_error!(
    /// Errors raised by video repositories
    VideoError, VideoErrorType, "Video"
);

define_domain_error!(
    /// Errors raised while assembling the dashboard
    DashboardError, DashboardErrorType, "Dashboard"
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DatabaseError;
    use crate::repository::{DomainError, Failure};

    #[test]
    fn test_permission_denied_is_unauthorized_in_every_context() {
        let denied = || Failure::from(DatabaseError::permission_denied("service role required"));
        assert_eq!(CategoryError::from_failure(denied(), "op").kind, CategoryErrorType::Unauthorized);
        assert_eq!(QueueError::from_failure(denied(), "op").kind, QueueErrorType::Unauthorized);
        assert_eq!(PaymentError::from_failure(denied(), "op").kind, PaymentErrorType::Unauthorized);
        assert_eq!(ShopError::from_failure(denied(), "op").kind, ShopErrorType::Unauthorized);
        assert_eq!(CustomerError::from_failure(denied(), "op").kind, CustomerErrorType::Unauthorized);
        assert_eq!(ServiceError::from_failure(denied(), "op").kind, ServiceErrorType::Unauthorized);
        assert_eq!(EmployeeError::from_failure(denied(), "op").kind, EmployeeErrorType::Unauthorized);
        assert_eq!(VideoError::from_failure(denied(), "op").kind, VideoErrorType::Unauthorized);
        assert_eq!(DashboardError::from_failure(denied(), "op").kind, DashboardErrorType::Unauthorized);
    }

    #[test]
    fn test_constraint_violation_exists_everywhere() {
        let violated = || Failure::from(DatabaseError::constraint_violation("check failed"));
        assert_eq!(
            PaymentError::from_failure(violated(), "refund").kind,
            PaymentErrorType::ConstraintViolation
        );
        assert_eq!(
            VideoError::from_failure(violated(), "publish").kind,
            VideoErrorType::ConstraintViolation
        );
    }

    #[test]
    fn test_context_name_in_display() {
        let err = ShopError::new(ShopErrorType::NotFound, "no such shop").with_operation("get_shop");
        assert_eq!(err.to_string(), "Shop NOT_FOUND error during get_shop: no such shop");
    }
}
