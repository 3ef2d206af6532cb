// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

mod define_hook;
pub(crate) use define_hook::define_hook;
