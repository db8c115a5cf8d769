use axum::{
    body::Body,
    http::{header, HeaderValue, Request, Response},
};
use tower::util::{MapResponse, ServiceExt};

type ResponseOf<T> = <T as tower::Service<Request<Body>>>::Response;
type NoCache<T> = MapResponse<T, fn(ResponseOf<T>) -> ResponseOf<T>>;

/// Marks every response of the wrapped service as uncacheable, so edits to the
/// static page show up on the next reload.
pub(crate) trait NoCacheServiceExt<T>
where
    T: tower::Service<Request<Body>>,
{
    fn no_cache(self) -> NoCache<T>;
}

impl<T, ResponseBody> NoCacheServiceExt<T> for T
where
    T: tower::Service<Request<Body>, Response = Response<ResponseBody>>,
    ResponseBody: http_body::Body,
{
    fn no_cache(self) -> NoCache<T> {
        let f: fn(Response<ResponseBody>) -> Response<ResponseBody> = with_no_cache_headers;
        ServiceExt::<Request<Body>>::map_response(self, f)
    }
}

fn with_no_cache_headers<B>(mut response: Response<B>) -> Response<B> {
    let headers = response.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store"),
    );
    headers.insert(header::EXPIRES, HeaderValue::from_static("-1"));
    response
}
