// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// Generates a cloneable, thread-safe wrapper around a user-provided callback.
///
/// ```rust,ignore
/// define_hook!(OnStateChange(Fn(args: StateChangeArgs)));
/// ```
///
/// expands to a `pub(crate)` newtype over `Arc<dyn Fn(StateChangeArgs) + Send + Sync>` with
/// `new`, `call`, `Clone` and an opaque `Debug`.
macro_rules! define_hook {
    ($name:ident(Fn($($param_name:ident: $param_ty:ty),*))) => {
        pub(crate) struct $name(std::sync::Arc<dyn Fn($($param_ty),*) + Send + Sync>);

        impl $name {
            pub(crate) fn new<F>(hook: F) -> Self
            where
                F: Fn($($param_ty),*) + Send + Sync + 'static,
            {
                Self(std::sync::Arc::new(hook))
            }

            pub(crate) fn call(&self, $($param_name: $param_ty),*) {
                (self.0)($($param_name),*);
            }
        }

        impl Clone for $name {
            fn clone(&self) -> Self {
                Self(std::sync::Arc::clone(&self.0))
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name)).finish()
            }
        }
    };
}

pub(crate) use define_hook;
