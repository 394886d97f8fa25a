//! Completion bridge between script promises and host futures
//!
//! Settlement is at most once on both sides: a promise only settles while
//! pending and a [`HostFuture`] ignores every completion after the first.
//! Result values are always converted on the script thread.

use std::rc::Rc;
use std::sync::Arc;

use ferry_reflect::{HostError, HostFuture, HostResult, HostValue, TypeSig};
use ferry_script::{JsPromise, Realm, ScriptError, Value};
use tracing::debug;

use crate::error::{MarshalError, MarshalResult};
use crate::marshaller::Marshaller;
use crate::registry::HostSlot;

const FRAME: &str = "<host future>";

/// Host future completed by a script promise.
///
/// Cancelling the future calls the promise's `cancel` function when it has
/// one.
pub(crate) fn promise_to_future(
    m: &Marshaller,
    realm: &Realm,
    promise: &JsPromise,
    result: &TypeSig,
) -> MarshalResult<HostFuture> {
    let future = HostFuture::new();

    if promise.object().get(realm, "cancel")?.is_function() {
        let target = realm.persist(promise.to_value());
        future.set_canceller(move || {
            let dispatcher = target.dispatcher();
            let posted = dispatcher.post(move |realm| {
                let cancelled = target
                    .object(realm)
                    .and_then(|promise| promise.call_method(realm, "cancel", &[]));
                if let Err(err) = cancelled {
                    debug!(%err, "promise cancel failed");
                }
            });
            if let Err(err) = posted {
                debug!(%err, "could not forward cancellation");
            }
        });
    }

    let completion = future.clone();
    let weak = m.weak();
    let result = result.clone();
    promise.on_settled(realm, move |realm, outcome| {
        let settled = match outcome {
            Ok(value) => Marshaller::upgrade(&weak)
                .and_then(|m| m.to_host(realm, &result, &value))
                .map_err(HostError::from),
            Err(reason) => Err(HostError::from(MarshalError::from(realm.value_to_error(&reason)))),
        };
        match settled {
            Ok(value) => completion.complete(value),
            Err(err) => completion.fail(err),
        };
    });
    Ok(future)
}

/// Script promise settled by a host future, carrying a `cancel()` method
pub(crate) fn future_to_promise(m: &Marshaller, realm: &Realm, future: &HostFuture, result: &TypeSig) -> JsPromise {
    let promise = realm.create_promise();
    promise
        .object()
        .set_internal(Arc::new(HostSlot(HostValue::Future(future.clone()))));
    let cancel_target = future.clone();
    promise
        .object()
        .define_method("cancel", Rc::new(move |_, _, _| Ok(Value::Bool(cancel_target.cancel()))));

    if let Some(outcome) = future.result() {
        settle(m, realm, &promise, result, outcome);
        return promise;
    }

    let target = realm.persist(promise.to_value());
    let dispatcher = target.dispatcher();
    let weak = m.weak();
    let result = result.clone();
    future.on_complete(move |outcome| {
        let outcome = outcome.clone();
        let posted = dispatcher.post(move |realm| {
            let Some(promise) = target
                .get(realm)
                .ok()
                .and_then(|value| JsPromise::from_value(&value))
            else {
                return;
            };
            match Marshaller::upgrade(&weak) {
                Ok(m) => settle(&m, realm, &promise, &result, outcome),
                Err(err) => {
                    promise.reject(realm, realm.error_value(&err.into_script_error(FRAME)));
                }
            }
        });
        if let Err(err) = posted {
            debug!(%err, "dropped future completion");
        }
    });
    promise
}

fn settle(m: &Marshaller, realm: &Realm, promise: &JsPromise, result: &TypeSig, outcome: HostResult<HostValue>) {
    let converted = match outcome {
        Ok(value) => m.to_script(realm, result, &value),
        Err(HostError::Cancelled) => {
            let err = ScriptError::exception("CancelError", "operation was cancelled");
            promise.reject(realm, realm.error_value(&err));
            return;
        }
        Err(err) => Err(MarshalError::Host(err)),
    };
    match converted {
        Ok(value) => {
            promise.resolve(realm, value);
        }
        Err(err) => {
            promise.reject(realm, realm.error_value(&err.into_script_error(FRAME)));
        }
    }
}
