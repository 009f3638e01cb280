//! Shared fixtures for this crate's unit tests.

use std::time::Duration;

use objwire_invoke::{ApplicationError, MethodCaller, ServiceCatalog, ServiceDefinition};
use objwire_types::{ParamSpec, StateField, TypeDescriptor};

/// `Counter` (count, optional owner, `add`, `slow`) and `Profile` (name).
pub(crate) fn catalog() -> ServiceCatalog {
    let counter = ServiceDefinition::builder("Counter")
        .field(StateField::new("count", 0, TypeDescriptor::int()))
        .field(StateField::new(
            "owner",
            1,
            TypeDescriptor::optional(TypeDescriptor::reference("Profile")),
        ))
        .method(MethodCaller::unary(
            "add",
            ParamSpec::new("n", TypeDescriptor::int()),
            TypeDescriptor::int(),
            |obj, n: i64| {
                let count = obj.get_as::<i64>("count")? + n;
                obj.set("count", count)?;
                if count > 100 {
                    return Err(ApplicationError::new("overflow"));
                }
                Ok(count)
            },
        ))
        .method(
            MethodCaller::unary(
                "slow",
                ParamSpec::new("millis", TypeDescriptor::int()),
                TypeDescriptor::int(),
                |obj, millis: i64| {
                    obj.set("count", -1i64)?;
                    std::thread::sleep(Duration::from_millis(millis as u64));
                    Ok(millis)
                },
            )
            .with_timeout(Duration::from_millis(50)),
        )
        .build()
        .expect("counter service");
    let profile = ServiceDefinition::builder("Profile")
        .field(StateField::new("name", 0, TypeDescriptor::string()))
        .build()
        .expect("profile service");
    ServiceCatalog::new([counter, profile]).expect("catalog")
}

