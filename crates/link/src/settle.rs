// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fan-out helpers: run every future to completion, then reduce.
//!
//! Siblings of a failed future always finish, so their side effects are
//! accounted for before the caller picks an error.

use std::future::Future;

use futures_util::future::join_all;

/// Await all futures and return each result in input order.
pub async fn settle_all<I, F, T, E>(futures: I) -> Vec<Result<T, E>>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>>,
{
    join_all(futures).await
}

/// First error in input order wins; otherwise all values in input order.
pub fn first_error<T, E>(results: Vec<Result<T, E>>) -> Result<Vec<T>, E> {
    results.into_iter().collect()
}
