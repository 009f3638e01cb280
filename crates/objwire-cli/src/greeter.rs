use objwire_sdk::prelude::*;

pub const CLASS: &str = "Greeter";

pub fn service() -> SdkResult<ServiceDefinition> {
    let definition = ServiceDefinition::builder(CLASS)
        .field(StateField::new("greeting", 0, TypeDescriptor::string()).with_default("Hello"))
        .field(StateField::new("greeted", 1, TypeDescriptor::int()).with_default(0i64))
        .field(StateField::new(
            "last_name",
            2,
            TypeDescriptor::optional(TypeDescriptor::string()),
        ))
        .method(MethodCaller::unary(
            "greet",
            ParamSpec::new("name", TypeDescriptor::string()),
            TypeDescriptor::string(),
            |obj, name: String| {
                if name.trim().is_empty() {
                    return Err(ApplicationError::new("name must not be empty"));
                }
                let greeting: String = obj.get_as("greeting")?;
                let greeted: i64 = obj.get_as("greeted")?;
                obj.set("greeted", greeted + 1)?;
                obj.set("last_name", name.as_str())?;
                Ok(format!("{greeting}, {name}!"))
            },
        ))
        .method(MethodCaller::nullary("stats", TypeDescriptor::int(), |obj| {
            Ok(obj.get_as::<i64>("greeted")?)
        }))
        .read_accessor("get_greeting", "greeting")
        .write_accessor("set_greeting", "greeting")
        .build()?;
    Ok(definition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use objwire_sdk::ResponseStatus;

    fn objwire() -> ObjWire {
        ObjWire::builder().service(service().unwrap()).build().unwrap()
    }

    #[tokio::test]
    async fn greet_counts_calls() {
        let ow = objwire();
        let proxy = ow.proxy((CLASS, 0u32, 1u64)).unwrap();
        let reply: String = proxy.call_as("greet", "Ada").await.unwrap();
        assert_eq!(reply, "Hello, Ada!");
        proxy.call("greet", "Grace").await.unwrap();
        assert_eq!(proxy.call_as::<i64>("stats", ()).await.unwrap(), 2);
        assert_eq!(proxy.read("get_greeting").unwrap(), Value::from("Hello"));
    }

    #[tokio::test]
    async fn empty_name_is_an_application_error() {
        let ow = objwire();
        let target = ObjectIdentity::new(CLASS, 0, 1);
        let response = ow
            .dispatch(&target, objwire_sdk::InvocationEnvelope::new("greet", br#""  ""#.to_vec()))
            .await;
        assert_eq!(response.status, ResponseStatus::AppError);
        assert_eq!(response.error_report().unwrap().message, "name must not be empty");
    }

    #[tokio::test]
    async fn write_accessor_changes_the_greeting() {
        let ow = objwire();
        let proxy = ow.proxy((CLASS, 0u32, 2u64)).unwrap();
        proxy.write("set_greeting", "Hi").unwrap();
        let reply: String = proxy.call_as("greet", "Linus").await.unwrap();
        assert_eq!(reply, "Hi, Linus!");
    }
}
