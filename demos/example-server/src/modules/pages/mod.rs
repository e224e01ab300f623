use crate::modules::users::UserRepository;
use bunstone::prelude::*;

/// Server-rendered pages hydrated by the bundles built from `views/`.
pub struct PagesModule;

#[derive(Injectable)]
pub struct PageController {
    users: Arc<dyn UserRepository>,
}

fn greeting() -> Arc<dyn Component> {
    FnComponent::new("Greeting", |model: &Value| {
        Element::new("button").text(format!(
            "Hello {}, clicked 0 times",
            model["name"].as_str().unwrap_or("stranger")
        ))
    })
}

impl Module for PagesModule {
    fn descriptor() -> ModuleDescriptor {
        ModuleDescriptor::of::<Self>()
            .import::<crate::modules::users::UsersModule>()
            .controller(
                Controller::<PageController>::new("/")
                    .route(
                        Route::get("home", "/").render(greeting()),
                        |ctrl, _| async move {
                            let name = ctrl
                                .users
                                .all()
                                .first()
                                .map_or_else(|| "stranger".to_string(), |user| user.name.clone());
                            Ok::<_, RequestError>(json!({ "name": name, "title": "Welcome" }))
                        },
                    )
                    .route(
                        Route::get("health", "health").header("cache-control", "no-store"),
                        |_, _| async { Ok::<_, RequestError>(json!({ "status": "ok" })) },
                    ),
            )
    }
}
