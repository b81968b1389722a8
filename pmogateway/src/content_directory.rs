//! Default [`MediaBackend`]: ContentDirectory `Browse` and `Search` through
//! the device's proxy.
//!
//! Listings may be fetched in pages (`browse_page_size`): the task then
//! chains `Browse`/`Search` calls until the requested window is filled or
//! the device runs out of matches.

use tracing::debug;

use crate::backend::{
    Completion, GetAllArgs, GetPropArgs, GetResourceArgs, ListChildrenArgs, MediaBackend,
    PropertyMap, Reply, ReplyResult, SearchArgs, Target,
};
use crate::capabilities::BusInterface;
use crate::didl::{self, DidlObject, ObjectLocation};
use crate::errors::GatewayError;
use crate::path::PathScheme;
use crate::props::{Filter, PropertyMask, PropertyTable};
use crate::proxy::{ActionRequest, ActionResponse, ServiceProxy};
use crate::queue::{ActionTask, Flow, QueueTask, Step};

pub const CONTENT_DIRECTORY: &str = "urn:schemas-upnp-org:service:ContentDirectory:1";

fn browse(object_id: &str, flag: &str, filter: &str, start: u32, count: u32, sort_by: &str) -> ActionRequest {
    ActionRequest::new(CONTENT_DIRECTORY, "Browse")
        .arg("ObjectID", object_id)
        .arg("BrowseFlag", flag)
        .arg("Filter", filter)
        .arg("StartingIndex", start.to_string())
        .arg("RequestedCount", count.to_string())
        .arg("SortCriteria", sort_by)
}

fn search(container_id: &str, query: &str, filter: &str, start: u32, count: u32, sort_by: &str) -> ActionRequest {
    ActionRequest::new(CONTENT_DIRECTORY, "Search")
        .arg("ContainerID", container_id)
        .arg("SearchCriteria", query)
        .arg("Filter", filter)
        .arg("StartingIndex", start.to_string())
        .arg("RequestedCount", count.to_string())
        .arg("SortCriteria", sort_by)
}

fn objects_of(response: &ActionResponse) -> Result<Vec<DidlObject>, GatewayError> {
    let payload = response
        .get("Result")
        .ok_or_else(|| GatewayError::backend("Missing Result in ContentDirectory response"))?;
    didl::parse_didl(payload)
}

fn single_object(response: &ActionResponse, id: &str) -> Result<DidlObject, GatewayError> {
    objects_of(response)?
        .into_iter()
        .next()
        .ok_or_else(|| GatewayError::ObjectNotFound(format!("Object {} not returned by device", id)))
}

fn call_or_fail(request: ActionRequest, proxy: Option<&dyn ServiceProxy>, root_path: &str) -> Step {
    match proxy {
        Some(proxy) => Step::Call(proxy.begin_action(request)),
        None => Step::Fatal(GatewayError::device_not_found(root_path)),
    }
}

type ReplyFn = Box<dyn FnOnce(ActionResponse) -> ReplyResult + Send>;

enum Exchange {
    /// Answered without asking the device.
    Ready(ReplyResult),
    Call { request: ActionRequest, on_reply: ReplyFn },
    Waiting(ReplyFn),
    Finished,
}

/// One request, at most one remote call.
struct ExchangeContext {
    root_path: String,
    state: Exchange,
    completion: Option<Completion>,
}

impl ExchangeContext {
    fn finish(&mut self, result: ReplyResult) {
        if let Some(completion) = self.completion.take() {
            completion.complete(result);
        }
    }
}

fn exchange_step(ctx: &mut ExchangeContext, proxy: Option<&dyn ServiceProxy>) -> Step {
    match std::mem::replace(&mut ctx.state, Exchange::Finished) {
        Exchange::Ready(result) => {
            ctx.finish(result);
            Step::Done
        }
        Exchange::Call { request, on_reply } => {
            let step = call_or_fail(request, proxy, &ctx.root_path);
            if matches!(step, Step::Call(_)) {
                ctx.state = Exchange::Waiting(on_reply);
            }
            step
        }
        Exchange::Waiting(_) | Exchange::Finished => Step::Done,
    }
}

fn exchange_result(ctx: &mut ExchangeContext, result: Result<ActionResponse, GatewayError>) -> Flow {
    let on_reply = match std::mem::replace(&mut ctx.state, Exchange::Finished) {
        Exchange::Waiting(on_reply) => Some(on_reply),
        _ => None,
    };

    let reply = match (result, on_reply) {
        (Ok(response), Some(on_reply)) => on_reply(response),
        (Ok(_), None) => Err(GatewayError::backend("Unexpected ContentDirectory reply")),
        (Err(err), _) => Err(err),
    };
    ctx.finish(reply);
    Flow::Done
}

/// A window of children or search hits, possibly fetched page by page.
struct ListingContext {
    scheme: PathScheme,
    root_path: String,
    item_id: String,
    search_query: Option<String>,
    filter: Filter,
    sort_by: String,
    protocol_info: String,
    page_size: u32,
    next_start: u32,
    /// Objects still wanted; `None` for "all of them".
    remaining: Option<u32>,
    objects: Vec<PropertyMap>,
    completion: Option<Completion>,
}

impl ListingContext {
    fn page_count(&self) -> u32 {
        match (self.page_size, self.remaining) {
            (0, remaining) => remaining.unwrap_or(0),
            (page, None) => page,
            (page, Some(remaining)) => page.min(remaining),
        }
    }

    fn next_request(&self) -> ActionRequest {
        let count = self.page_count();
        match &self.search_query {
            Some(query) => search(
                &self.item_id,
                query,
                &self.filter.upnp,
                self.next_start,
                count,
                &self.sort_by,
            ),
            None => browse(
                &self.item_id,
                "BrowseDirectChildren",
                &self.filter.upnp,
                self.next_start,
                count,
                &self.sort_by,
            ),
        }
    }

    fn finish(&mut self, result: ReplyResult) {
        if let Some(completion) = self.completion.take() {
            completion.complete(result);
        }
    }

    /// Folds one page in. Returns true when the listing is complete.
    fn absorb(&mut self, response: &ActionResponse) -> Result<bool, GatewayError> {
        let page = objects_of(response)?;
        let parsed = u32::try_from(page.len()).unwrap_or(u32::MAX);
        // The device's count is only trusted up to what it actually sent.
        let returned = response
            .get_u32("NumberReturned")
            .map_or(parsed, |n| n.min(parsed));
        let total = response.get_u32("TotalMatches").unwrap_or(0);

        let location = ObjectLocation {
            scheme: &self.scheme,
            root_path: &self.root_path,
        };
        self.objects.extend(
            page.iter()
                .map(|object| object.to_properties(location, self.filter.mask, &self.protocol_info)),
        );

        self.next_start = self.next_start.checked_add(returned).ok_or_else(|| {
            GatewayError::backend(format!(
                "Listing of {} runs past the last index",
                self.item_id
            ))
        })?;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(returned);
        }

        let exhausted = returned == 0 || (total > 0 && self.next_start >= total);
        let filled = self.remaining == Some(0);
        Ok(self.page_size == 0 || exhausted || filled)
    }
}

fn listing_step(ctx: &mut ListingContext, proxy: Option<&dyn ServiceProxy>) -> Step {
    if ctx.completion.is_none() {
        return Step::Done;
    }
    call_or_fail(ctx.next_request(), proxy, &ctx.root_path)
}

fn listing_result(ctx: &mut ListingContext, result: Result<ActionResponse, GatewayError>) -> Flow {
    match result.and_then(|response| ctx.absorb(&response)) {
        Ok(false) => {
            debug!(path = %ctx.root_path, fetched = ctx.objects.len(), "Fetching next page");
            Flow::Continue
        }
        Ok(true) => {
            let objects = std::mem::take(&mut ctx.objects);
            ctx.finish(Ok(Reply::Objects(objects)));
            Flow::Done
        }
        Err(err) => {
            ctx.finish(Err(err));
            Flow::Done
        }
    }
}

/// `filter` plus the `res` elements resource selection needs.
fn with_resources(filter: &str) -> String {
    if filter == "*" || filter.split(',').any(|key| key == "res") {
        filter.to_string()
    } else if filter.is_empty() {
        "res".to_string()
    } else {
        format!("res,{}", filter)
    }
}

/// Restricts `map` to the properties of `interface`, `None` and the
/// Properties interface meaning all of them.
fn restrict(map: &mut PropertyMap, props: &PropertyTable, interface: Option<BusInterface>) {
    match interface {
        None | Some(BusInterface::Properties) => {}
        Some(interface) => {
            map.retain(|name, _| props.lookup(name).is_some_and(|p| p.interface == interface))
        }
    }
}

#[derive(Clone, Debug)]
pub struct ContentDirectoryBackend {
    scheme: PathScheme,
    props: PropertyTable,
    page_size: u32,
}

impl ContentDirectoryBackend {
    pub fn new(scheme: PathScheme, page_size: u32) -> Self {
        Self {
            scheme,
            props: PropertyTable::new(),
            page_size,
        }
    }

    fn exchange(&self, target: Target, state: Exchange, completion: Completion) -> Box<dyn QueueTask> {
        let context = ExchangeContext {
            root_path: target.device.path.clone(),
            state,
            completion: Some(completion),
        };
        Box::new(
            ActionTask::new(
                target.device.queue,
                target.device.proxy,
                context,
                Box::new(exchange_step),
                Box::new(exchange_result),
            )
            .with_cancellation(target.cancel),
        )
    }

    fn listing(
        &self,
        target: Target,
        search_query: Option<String>,
        window: (u32, u32),
        filter: Filter,
        sort_by: String,
        protocol_info: String,
        completion: Completion,
    ) -> Box<dyn QueueTask> {
        let (start, count) = window;
        let context = ListingContext {
            scheme: self.scheme.clone(),
            root_path: target.device.path.clone(),
            item_id: target.item_id.clone(),
            search_query,
            filter,
            sort_by,
            protocol_info,
            page_size: self.page_size,
            next_start: start,
            remaining: (count > 0).then_some(count),
            objects: Vec::new(),
            completion: Some(completion),
        };
        Box::new(
            ActionTask::new(
                target.device.queue,
                target.device.proxy,
                context,
                Box::new(listing_step),
                Box::new(listing_result),
            )
            .with_cancellation(target.cancel),
        )
    }
}

impl MediaBackend for ContentDirectoryBackend {
    fn list_children(
        &self,
        target: Target,
        args: ListChildrenArgs,
        completion: Completion,
    ) -> Box<dyn QueueTask> {
        self.listing(
            target,
            None,
            (args.start, args.count),
            args.filter,
            args.sort_by,
            args.protocol_info,
            completion,
        )
    }

    fn search(&self, target: Target, args: SearchArgs, completion: Completion) -> Box<dyn QueueTask> {
        self.listing(
            target,
            Some(args.query),
            (args.start, args.count),
            args.filter,
            args.sort_by,
            args.protocol_info,
            completion,
        )
    }

    fn get_all_properties(
        &self,
        target: Target,
        args: GetAllArgs,
        completion: Completion,
    ) -> Box<dyn QueueTask> {
        let is_root = target.is_root();
        let description = target.device.description.clone();

        if args.interface == Some(BusInterface::MediaDevice) {
            let reply = if is_root {
                Ok(Reply::Properties(didl::device_properties(&description, PropertyMask::ALL)))
            } else {
                Err(GatewayError::UnknownProperty(format!(
                    "{} is not implemented by {}",
                    BusInterface::MediaDevice,
                    target.item_id
                )))
            };
            return self.exchange(target, Exchange::Ready(reply), completion);
        }

        let scheme = self.scheme.clone();
        let props = self.props.clone();
        let root_path = target.device.path.clone();
        let item_id = target.item_id.clone();
        let on_reply: ReplyFn = Box::new(move |response| {
            let object = single_object(&response, &item_id)?;
            let location = ObjectLocation {
                scheme: &scheme,
                root_path: &root_path,
            };
            let mut map = object.to_properties(location, PropertyMask::ALL, &args.protocol_info);
            if is_root {
                map.extend(didl::device_properties(&description, PropertyMask::ALL));
            }
            restrict(&mut map, &props, args.interface);
            Ok(Reply::Properties(map))
        });

        let request = browse(&target.item_id, "BrowseMetadata", "*", 0, 0, "");
        self.exchange(target, Exchange::Call { request, on_reply }, completion)
    }

    fn get_property(
        &self,
        target: Target,
        args: GetPropArgs,
        completion: Completion,
    ) -> Box<dyn QueueTask> {
        let unknown = || GatewayError::UnknownProperty(args.name.clone());

        let prop = match args.prop {
            Some(prop)
                if args.interface.is_none_or(|iface| {
                    iface == prop.interface || iface == BusInterface::Properties
                }) =>
            {
                prop
            }
            _ => return self.exchange(target, Exchange::Ready(Err(unknown())), completion),
        };

        if prop.interface == BusInterface::MediaDevice {
            let reply = if target.is_root() {
                didl::device_property(&target.device.description, prop)
                    .map(Reply::Property)
                    .ok_or_else(unknown)
            } else {
                Err(unknown())
            };
            return self.exchange(target, Exchange::Ready(reply), completion);
        }

        let scheme = self.scheme.clone();
        let root_path = target.device.path.clone();
        let item_id = target.item_id.clone();
        let name = args.name.clone();
        let protocol_info = args.protocol_info.clone();
        let on_reply: ReplyFn = Box::new(move |response| {
            let object = single_object(&response, &item_id)?;
            let location = ObjectLocation {
                scheme: &scheme,
                root_path: &root_path,
            };
            object
                .property(prop, location, &protocol_info)
                .map(Reply::Property)
                .ok_or(GatewayError::UnknownProperty(name))
        });

        let filter = self.props.parse_filter(prop.name).upnp;
        let filter = if filter.is_empty() { "*".to_string() } else { filter };
        let request = browse(&target.item_id, "BrowseMetadata", &filter, 0, 0, "");
        self.exchange(target, Exchange::Call { request, on_reply }, completion)
    }

    fn get_resource(
        &self,
        target: Target,
        args: GetResourceArgs,
        completion: Completion,
    ) -> Box<dyn QueueTask> {
        let filter = with_resources(&args.filter.upnp);
        let item_id = target.item_id.clone();
        let on_reply: ReplyFn = Box::new(move |response| {
            let object = single_object(&response, &item_id)?;
            let res = object.select_resource(&args.protocol_info).ok_or_else(|| {
                GatewayError::ObjectNotFound(format!(
                    "No resource of {} matches the requested protocols",
                    item_id
                ))
            })?;
            Ok(Reply::Resource(object.resource_properties(res, args.filter.mask)))
        });

        let request = browse(&target.item_id, "BrowseMetadata", &filter, 0, 0, "");
        self.exchange(target, Exchange::Call { request, on_reply }, completion)
    }
}
